//! Core of a verifiable-credential trust library: a byte-exact TPM 2.0
//! command/response codec with authorization sessions, an RFC 7638 JWK
//! thumbprint engine over pooled secret buffers, and the JSON-LD
//! selective-disclosure machinery of the ecdsa-sd-2023 cryptosuite.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod disclosure;
pub mod jose;
pub mod probe;
pub mod resolver;
pub mod sensitive;
pub mod tpm;

// Re-export the types most callers start from.
pub use codec::{ByteReader, ByteWriter, CodecError};
pub use config::TrustConfig;
pub use crypto::{CryptoError, PrimitiveRegistry, Purpose};
pub use disclosure::{
    partition_statements, select_fragments, Canonicalizer, JsonPointer, SelectionError,
    StatementPartition,
};
pub use jose::{thumbprint_b64url, ThumbprintError};
pub use resolver::{ContextResolver, ContextSource, ResolverError, StaticResolver};
pub use sensitive::{SensitiveBuffer, SensitivePool};
pub use tpm::{Session, TpmDevice, TpmError};
