//! TPM 2.0 command/response codec and session engine: wire constants,
//! response-code taxonomy, transports, authorization sessions, and the
//! command executor with its typed command contracts.

pub mod commands;
pub mod executor;
pub mod rc;
pub mod session;
pub mod transport;
pub mod types;

pub use commands::{
    CapabilityData, CreatePrimary, CreatePrimaryResponse, FlushContext, GetCapability,
    GetCapabilityResponse, GetRandom, GetRandomResponse, GetTestResult, GetTestResultResponse,
    IncrementalSelfTest, IncrementalSelfTestResponse, PcrExtend, PcrRead, PcrReadResponse,
    PcrSelection, PublicParams, PublicUnique, ReadPublic, ReadPublicResponse, SchemeDef, SelfTest,
    Shutdown, StartAuthSession, StartAuthSessionResponse, Startup, StirRandom, SymDef,
    TaggedProperty, TpmtPublic,
};
pub use executor::{CommandRegistry, ScopedHandle, TpmCommand, TpmDevice, TpmError};
pub use rc::{RcBase, RcLocation, TpmRc};
pub use session::{derive_session_key, kdf_a, CommandAuth, ResponseAuth, Session, SessionError};
pub use transport::{TcpSimulatorTransport, Transport, TransportError};
pub use types::{
    AlgId, Capability, CommandCode, EccCurve, HandleClass, ObjectAttributes, SessionAttributes,
    SessionType, StartupType, Tag, TpmHandle,
};

#[cfg(target_os = "linux")]
pub use transport::DeviceTransport;
