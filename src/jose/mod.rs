//! JOSE support: the interned identifier registry and the RFC 7638 JWK
//! thumbprint engine.

pub mod thumbprint;
pub mod tokens;

pub use thumbprint::{
    ec_thumbprint, okp_thumbprint, oct_thumbprint, rsa_thumbprint, thumbprint_b64url,
    thumbprint_of, ThumbprintError,
};
pub use tokens::canonicalize;
