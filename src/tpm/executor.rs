//! The command executor: serializes typed commands into TPM 2.0 wire
//! frames, appends authorization areas, submits through a transport, and
//! decodes responses via a registry keyed by command code.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::tpm::rc::TpmRc;
use crate::tpm::session::{ResponseAuth, Session, SessionError};
use crate::tpm::transport::{Transport, TransportError};
use crate::tpm::types::{AlgId, CommandCode, Tag, TpmHandle};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::any::Any;
use std::collections::HashMap;
use thiserror::Error;

/// Command header length: tag(2) + size(4) + code(4).
pub const HEADER_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum TpmError {
    #[error(transparent)]
    TransportFailed(#[from] TransportError),
    #[error("tpm: {rc}")]
    Tpm { rc: TpmRc },
    #[error("tpm: {rc} (retryable)")]
    Retry { rc: TpmRc },
    #[error("tpm: no decoder registered for command {code:#010x}")]
    CodecNotRegistered { code: u32 },
    #[error("tpm: response size field {declared} does not match {actual} received bytes")]
    FramingMismatch { declared: u32, actual: usize },
    #[error("tpm: decoder produced a foreign response type")]
    ResponseTypeMismatch,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TpmError {
    fn from_rc(rc: TpmRc) -> Self {
        if rc.is_retryable() {
            TpmError::Retry { rc }
        } else {
            TpmError::Tpm { rc }
        }
    }
}

/// A typed TPM command: its code, handle area, and parameter encoding.
/// Response decoding lives in the registry, not on the type.
pub trait TpmCommand {
    type Response: Send + 'static;

    const CODE: CommandCode;

    fn handles(&self) -> Vec<TpmHandle> {
        Vec::new()
    }

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError>;
}

type DecodeFn = fn(&[TpmHandle], &mut ByteReader<'_>) -> Result<Box<dyn Any + Send>, TpmError>;

struct RegistryEntry {
    /// Number of handles the response carries ahead of the parameter area.
    response_handles: usize,
    decode: DecodeFn,
}

/// Maps a command code to the decoder for its response. Populated once at
/// device construction; executing an unregistered command fails without
/// touching the transport.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<u32, RegistryEntry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: CommandCode, response_handles: usize, decode: DecodeFn) {
        self.entries.insert(
            code as u32,
            RegistryEntry {
                response_handles,
                decode,
            },
        );
    }

    pub fn contains(&self, code: CommandCode) -> bool {
        self.entries.contains_key(&(code as u32))
    }

    fn get(&self, code: u32) -> Result<&RegistryEntry, TpmError> {
        self.entries
            .get(&code)
            .ok_or(TpmError::CodecNotRegistered { code })
    }
}

/// A TPM device: one transport plus the decoder registry. Commands on a
/// device are strictly sequential; `&mut self` on every wire operation is
/// how this crate enforces the device's serialization requirement.
pub struct TpmDevice {
    transport: Box<dyn Transport>,
    registry: CommandRegistry,
}

impl TpmDevice {
    pub fn new(transport: Box<dyn Transport>, registry: CommandRegistry) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Executes `command` with no authorization sessions.
    pub fn execute<C: TpmCommand>(&mut self, command: &C) -> Result<C::Response, TpmError> {
        self.execute_with_sessions(command, &mut [])
    }

    /// Executes `command` with the given sessions authorizing it, in
    /// order. Each session contributes an authorization structure on the
    /// way out and absorbs the matching response authorization on the way
    /// back.
    pub fn execute_with_sessions<C: TpmCommand>(
        &mut self,
        command: &C,
        sessions: &mut [&mut Session],
    ) -> Result<C::Response, TpmError> {
        let entry = self.registry.get(C::CODE as u32)?;
        let response_handles = entry.response_handles;
        let decode = entry.decode;

        let handles = command.handles();
        let mut params = ByteWriter::new();
        command.encode_parameters(&mut params)?;
        let params = params.into_vec();

        let request = build_frame(C::CODE, &handles, &params, sessions)?;
        log::debug!(
            "tpm: submit {:?} ({} bytes, {} sessions)",
            C::CODE,
            request.len(),
            sessions.len()
        );

        let response = match self.transport.submit(&request) {
            Ok(bytes) => bytes,
            Err(err) => {
                // The device may or may not have consumed the command;
                // every participating nonce chain is now unknowable.
                for session in sessions.iter_mut() {
                    session.mark_broken();
                }
                return Err(err.into());
            }
        };

        let frame = parse_frame(&response, !sessions.is_empty(), response_handles)?;
        log::debug!("tpm: {:?} -> {}", C::CODE, frame.rc);

        if !frame.rc.is_success() {
            return Err(TpmError::from_rc(frame.rc));
        }

        // Session bookkeeping before decoding, so a decoder error cannot
        // skip the nonce rotation.
        if !sessions.is_empty() {
            let mut reader = ByteReader::new(frame.auth_area);
            for session in sessions.iter_mut() {
                let auth = ResponseAuth::decode(&mut reader)?;
                let rp = if session.is_password() {
                    Vec::new()
                } else {
                    rp_hash(session.hash_alg(), frame.rc, C::CODE, frame.parameters)?
                };
                session.absorb_response(&auth, &rp)?;
            }
        }

        let mut reader = ByteReader::new(frame.parameters);
        let boxed = decode(&frame.handles, &mut reader)?;
        boxed
            .downcast::<C::Response>()
            .map(|b| *b)
            .map_err(|_| TpmError::ResponseTypeMismatch)
    }

    /// Closes the underlying transport.
    pub fn close(&mut self) -> Result<(), TpmError> {
        self.transport.close().map_err(TpmError::from)
    }
}

/// An owned transient-object or session handle that guarantees a
/// `FlushContext` on every exit path. Dropping it flushes; [`Self::flush`]
/// does the same with an observable result.
pub struct ScopedHandle<'d> {
    device: &'d mut TpmDevice,
    handle: TpmHandle,
    armed: bool,
}

impl<'d> ScopedHandle<'d> {
    pub fn new(device: &'d mut TpmDevice, handle: TpmHandle) -> Self {
        Self {
            device,
            handle,
            armed: handle.needs_flush(),
        }
    }

    pub fn handle(&self) -> TpmHandle {
        self.handle
    }

    /// The owning device, for issuing further commands against the handle.
    pub fn device(&mut self) -> &mut TpmDevice {
        self.device
    }

    /// Flushes now and reports the outcome.
    pub fn flush(mut self) -> Result<(), TpmError> {
        self.armed = false;
        self.device.flush_context(self.handle)
    }

    /// Hands the raw handle back without flushing; the caller now owns
    /// the lifecycle.
    pub fn release(mut self) -> TpmHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.device.flush_context(self.handle) {
                log::warn!("tpm: flush of {} on drop failed: {err}", self.handle);
            }
        }
    }
}

struct ResponseFrame<'a> {
    rc: TpmRc,
    handles: Vec<TpmHandle>,
    parameters: &'a [u8],
    auth_area: &'a [u8],
}

fn build_frame(
    code: CommandCode,
    handles: &[TpmHandle],
    params: &[u8],
    sessions: &mut [&mut Session],
) -> Result<Vec<u8>, TpmError> {
    let tag = if sessions.is_empty() {
        Tag::NoSessions
    } else {
        Tag::Sessions
    };

    let mut w = ByteWriter::with_capacity(HEADER_LEN + handles.len() * 4 + params.len());
    w.write_u16(tag as u16);
    let size_at = w.written();
    w.write_u32(0); // patched below
    w.write_u32(code as u32);
    for handle in handles {
        w.write_u32(handle.0);
    }

    if !sessions.is_empty() {
        let mut auth_area = ByteWriter::new();
        for session in sessions.iter_mut() {
            // Password pseudo-sessions carry no HMAC, so no cpHash.
            let cp = if session.is_password() {
                Vec::new()
            } else {
                cp_hash(session.hash_alg(), code, handles, params)?
            };
            let auth = session.begin_auth(&cp)?;
            auth.encode(&mut auth_area)?;
        }
        w.write_u32(auth_area.written() as u32);
        w.write_bytes(auth_area.as_slice());
    }

    w.write_bytes(params);
    let total = w.written() as u32;
    w.patch_u32_at(size_at, total);
    Ok(w.into_vec())
}

fn parse_frame<'a>(
    response: &'a [u8],
    had_sessions: bool,
    response_handles: usize,
) -> Result<ResponseFrame<'a>, TpmError> {
    let mut r = ByteReader::new(response);
    let tag = r.read_u16()?;
    let size = r.read_u32()?;
    let rc = TpmRc(r.read_u32()?);

    if size as usize != response.len() {
        return Err(TpmError::FramingMismatch {
            declared: size,
            actual: response.len(),
        });
    }

    if !rc.is_success() {
        // Error responses carry no payload, and 1.2-style tag checking
        // failures come back as RSP_COMMAND.
        if tag != Tag::NoSessions as u16 && tag != Tag::RspCommand as u16 {
            return Err(CodecError::UnexpectedTag(tag).into());
        }
        return Ok(ResponseFrame {
            rc,
            handles: Vec::new(),
            parameters: &[],
            auth_area: &[],
        });
    }

    let expected_tag = if had_sessions {
        Tag::Sessions
    } else {
        Tag::NoSessions
    };
    if tag != expected_tag as u16 {
        return Err(CodecError::UnexpectedTag(tag).into());
    }

    let mut handles = Vec::with_capacity(response_handles);
    for _ in 0..response_handles {
        handles.push(TpmHandle(r.read_u32()?));
    }

    if had_sessions {
        // With sessions the parameter area is length-prefixed so the
        // authorization area that follows can be located.
        let param_len = r.read_u32()? as usize;
        let parameters = r.read_bytes(param_len)?;
        let auth_area = r.read_bytes(r.remaining())?;
        Ok(ResponseFrame {
            rc,
            handles,
            parameters,
            auth_area,
        })
    } else {
        let parameters = r.read_bytes(r.remaining())?;
        Ok(ResponseFrame {
            rc,
            handles,
            parameters,
            auth_area: &[],
        })
    }
}

/// `cpHash = H(commandCode || names || parameters)`. Entity names are the
/// big-endian handle values; object-name tracking beyond that is the
/// caller's concern.
fn cp_hash(
    alg: AlgId,
    code: CommandCode,
    handles: &[TpmHandle],
    params: &[u8],
) -> Result<Vec<u8>, TpmError> {
    let mut parts: Vec<Vec<u8>> = vec![(code as u32).to_be_bytes().to_vec()];
    for handle in handles {
        parts.push(handle.0.to_be_bytes().to_vec());
    }
    parts.push(params.to_vec());
    digest_over(alg, &parts)
}

/// `rpHash = H(responseCode || commandCode || parameters)`.
fn rp_hash(alg: AlgId, rc: TpmRc, code: CommandCode, params: &[u8]) -> Result<Vec<u8>, TpmError> {
    digest_over(
        alg,
        &[
            rc.0.to_be_bytes().to_vec(),
            (code as u32).to_be_bytes().to_vec(),
            params.to_vec(),
        ],
    )
}

pub(crate) fn digest_over(alg: AlgId, parts: &[Vec<u8>]) -> Result<Vec<u8>, TpmError> {
    macro_rules! run {
        ($digest:ty) => {{
            let mut hasher = <$digest>::new();
            for part in parts {
                hasher.update(part);
            }
            Ok(hasher.finalize().to_vec())
        }};
    }
    match alg {
        AlgId::Sha256 => run!(Sha256),
        AlgId::Sha384 => run!(Sha384),
        AlgId::Sha512 => run!(Sha512),
        other => Err(SessionError::BadHashAlg(other).into()),
    }
}
