//! Environment probes consumed by conditional test harnesses: hardware
//! availability, CI detection, and platform identification. All of them
//! are pure queries.

/// The single knob for CI detection. Harnesses with a different
/// convention call [`running_in_ci_via`] with their own variable.
pub const DEFAULT_CI_ENV_VAR: &str = "CI";

/// True when the CI environment variable is set to anything but an
/// explicit negative.
pub fn running_in_ci() -> bool {
    running_in_ci_via(DEFAULT_CI_ENV_VAR)
}

pub fn running_in_ci_via(var: &str) -> bool {
    match std::env::var(var) {
        Ok(value) => {
            let v = value.trim();
            !v.is_empty() && !v.eq_ignore_ascii_case("false") && v != "0"
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    Linux,
    MacOs,
    Other,
}

pub fn current_os() -> Os {
    if cfg!(target_os = "windows") {
        Os::Windows
    } else if cfg!(target_os = "linux") {
        Os::Linux
    } else if cfg!(target_os = "macos") {
        Os::MacOs
    } else {
        Os::Other
    }
}

/// Whether a TPM endpoint this crate can talk to is present: a kernel
/// device node on Linux, a reachable simulator elsewhere. Probing opens
/// nothing on the device itself.
pub fn tpm_is_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        crate::tpm::transport::DeviceTransport::NODES
            .iter()
            .any(|node| std::path::Path::new(node).exists())
    }
    #[cfg(not(target_os = "linux"))]
    {
        use crate::tpm::TcpSimulatorTransport;
        let addr = std::net::SocketAddr::from((
            [127, 0, 0, 1],
            TcpSimulatorTransport::DEFAULT_COMMAND_PORT,
        ));
        std::net::TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(200)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ci_probe_reads_the_given_variable() {
        // Use a variable name no CI system sets.
        let var = "VERITRUST_TEST_CI_PROBE";
        std::env::remove_var(var);
        assert!(!running_in_ci_via(var));

        std::env::set_var(var, "true");
        assert!(running_in_ci_via(var));

        std::env::set_var(var, "false");
        assert!(!running_in_ci_via(var));

        std::env::set_var(var, "0");
        assert!(!running_in_ci_via(var));

        std::env::set_var(var, "");
        assert!(!running_in_ci_via(var));

        std::env::remove_var(var);
    }

    #[test]
    fn current_os_matches_compile_target() {
        let os = current_os();
        #[cfg(target_os = "linux")]
        assert_eq!(os, Os::Linux);
        #[cfg(target_os = "windows")]
        assert_eq!(os, Os::Windows);
        #[cfg(target_os = "macos")]
        assert_eq!(os, Os::MacOs);
    }

    #[test]
    fn tpm_probe_does_not_panic() {
        // The result is environment-specific; the contract is that the
        // probe is a cheap, side-effect-free query.
        let _ = tpm_is_available();
    }
}
