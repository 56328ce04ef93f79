//! JWK thumbprints per RFC 7638: the canonical JSON form is assembled
//! byte-exactly (required members only, lexicographic order, no
//! whitespace) inside a pooled sensitive buffer and digested with SHA-256.

use crate::jose::tokens;
use crate::sensitive::{SensitiveBuffer, SensitivePool};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThumbprintError {
    #[error("thumbprint: required parameter {0:?} is missing")]
    ParameterMissing(&'static str),
    #[error("thumbprint: required parameter {0:?} is empty")]
    ParameterEmpty(&'static str),
}

/// EC key thumbprint: canonical members `crv`, `kty`, `x`, `y`.
pub fn ec_thumbprint(crv: &str, x: &str, y: &str) -> Result<SensitiveBuffer, ThumbprintError> {
    require(tokens::CRV, crv)?;
    require(tokens::X, x)?;
    require(tokens::Y, y)?;
    compute(&[
        (tokens::CRV, crv),
        (tokens::KTY, tokens::EC),
        (tokens::X, x),
        (tokens::Y, y),
    ])
}

/// OKP key thumbprint (RFC 8037): canonical members `crv`, `kty`, `x`.
pub fn okp_thumbprint(crv: &str, x: &str) -> Result<SensitiveBuffer, ThumbprintError> {
    require(tokens::CRV, crv)?;
    require(tokens::X, x)?;
    compute(&[
        (tokens::CRV, crv),
        (tokens::KTY, tokens::OKP),
        (tokens::X, x),
    ])
}

/// RSA key thumbprint: canonical members `e`, `kty`, `n`.
pub fn rsa_thumbprint(e: &str, n: &str) -> Result<SensitiveBuffer, ThumbprintError> {
    require(tokens::E, e)?;
    require(tokens::N, n)?;
    compute(&[
        (tokens::E, e),
        (tokens::KTY, tokens::RSA),
        (tokens::N, n),
    ])
}

/// Symmetric key thumbprint: canonical members `k`, `kty`. The canonical
/// form carries the key itself, hence the pooled buffer throughout.
pub fn oct_thumbprint(k: &str) -> Result<SensitiveBuffer, ThumbprintError> {
    require(tokens::K, k)?;
    compute(&[(tokens::K, k), (tokens::KTY, tokens::OCT)])
}

/// Thumbprint over an arbitrary parameter set. Members are sorted by
/// ordinal byte comparison of their names; values are inserted verbatim
/// (the caller base64url-encodes them).
pub fn thumbprint_of(params: &[(&'static str, &str)]) -> Result<SensitiveBuffer, ThumbprintError> {
    if !params.iter().any(|(name, _)| *name == tokens::KTY) {
        return Err(ThumbprintError::ParameterMissing(tokens::KTY));
    }
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    for (name, value) in &sorted {
        require(name, value)?;
    }
    compute(&sorted)
}

/// The common presentation form: base64url, no padding.
pub fn thumbprint_b64url(digest: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(digest)
}

fn require(name: &'static str, value: &str) -> Result<(), ThumbprintError> {
    if value.is_empty() {
        return Err(ThumbprintError::ParameterEmpty(name));
    }
    Ok(())
}

/// Writes `{"k1":"v1","k2":"v2",...}` into a pooled buffer sized exactly
/// and digests it. Parameter names and base64url values never need JSON
/// escaping, so the canonical form is plain concatenation.
fn compute(members: &[(&'static str, &str)]) -> Result<SensitiveBuffer, ThumbprintError> {
    if members.is_empty() {
        return Err(ThumbprintError::ParameterMissing(tokens::KTY));
    }

    // Braces + per-member quotes/colon + separating commas.
    let payload: usize = members.iter().map(|(k, v)| k.len() + v.len()).sum();
    let exact = 2 + payload + members.len() * 5 + (members.len() - 1);

    let pool = SensitivePool::shared();
    let mut canonical = pool.rent(exact);
    let mut at = 0;
    let mut push = |buf: &mut SensitiveBuffer, bytes: &[u8]| {
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };

    push(&mut canonical, b"{");
    for (i, (name, value)) in members.iter().enumerate() {
        if i > 0 {
            push(&mut canonical, b",");
        }
        push(&mut canonical, b"\"");
        push(&mut canonical, name.as_bytes());
        push(&mut canonical, b"\":\"");
        push(&mut canonical, value.as_bytes());
        push(&mut canonical, b"\"");
    }
    push(&mut canonical, b"}");
    debug_assert_eq!(at, exact);

    let digest = Sha256::digest(canonical.as_ref());
    let mut out = pool.rent(digest.len());
    out.copy_from_slice(&digest);
    Ok(out)
}
