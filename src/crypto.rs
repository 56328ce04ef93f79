//! Pluggable cryptographic primitives. The core never calls a hash or
//! signature implementation directly; everything goes through a registry
//! keyed by `(algorithm, purpose)` so deployments can swap in hardware or
//! FIPS-validated providers without touching the call sites.

use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::HashMap;
use thiserror::Error;

use crate::jose::tokens;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto: no {purpose:?} primitive registered for {alg:?}")]
    UnsupportedAlgorithm { alg: String, purpose: Purpose },
    #[error("crypto: key rejected: {0}")]
    KeyRejected(String),
    #[error("crypto: signature verification failed")]
    SignatureInvalid,
    #[error("crypto: signing failed: {0}")]
    SigningFailed(String),
}

/// What a primitive is for. One algorithm name may appear under several
/// purposes (e.g. `ES256` for both signing and verification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Digest,
    Mac,
    Sign,
    Verify,
}

type DigestFn = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;
type MacFn = Box<dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync>;
type SignFn = Box<dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync>;
type VerifyFn = Box<dyn Fn(&[u8], &[u8], &[u8]) -> Result<(), CryptoError> + Send + Sync>;

enum Primitive {
    Digest(DigestFn),
    Mac(MacFn),
    Sign(SignFn),
    Verify(VerifyFn),
}

/// Canonical name for the one digest this crate's wire formats use.
pub static SHA256: &str = "SHA-256";

/// Registry of primitive implementations. [`PrimitiveRegistry::with_defaults`]
/// wires the pure-Rust providers; deployments may overwrite any entry.
#[derive(Default)]
pub struct PrimitiveRegistry {
    entries: HashMap<(String, Purpose), Primitive>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_digest(SHA256, Box::new(|data| Sha256::digest(data).to_vec()));

        registry.register_mac(tokens::HS256, Box::new(|key, data| mac_sha256(key, data)));
        registry.register_mac(tokens::HS384, Box::new(|key, data| mac_sha384(key, data)));
        registry.register_mac(tokens::HS512, Box::new(|key, data| mac_sha512(key, data)));

        registry.register_sign(tokens::EDDSA, Box::new(ed25519_sign));
        registry.register_verify(tokens::EDDSA, Box::new(ed25519_verify));

        registry.register_sign(tokens::ES256, Box::new(es256_sign));
        registry.register_verify(tokens::ES256, Box::new(es256_verify));
        registry.register_sign(tokens::ES384, Box::new(es384_sign));
        registry.register_verify(tokens::ES384, Box::new(es384_verify));
        registry.register_sign(tokens::ES256K, Box::new(es256k_sign));
        registry.register_verify(tokens::ES256K, Box::new(es256k_verify));

        registry.register_sign(tokens::RS256, Box::new(rs256_sign));
        registry.register_verify(tokens::RS256, Box::new(rs256_verify));
        registry.register_sign(tokens::PS256, Box::new(ps256_sign));
        registry.register_verify(tokens::PS256, Box::new(ps256_verify));

        registry
    }

    pub fn register_digest(&mut self, alg: &str, f: DigestFn) {
        self.entries
            .insert((alg.to_string(), Purpose::Digest), Primitive::Digest(f));
    }

    pub fn register_mac(&mut self, alg: &str, f: MacFn) {
        self.entries
            .insert((alg.to_string(), Purpose::Mac), Primitive::Mac(f));
    }

    pub fn register_sign(&mut self, alg: &str, f: SignFn) {
        self.entries
            .insert((alg.to_string(), Purpose::Sign), Primitive::Sign(f));
    }

    pub fn register_verify(&mut self, alg: &str, f: VerifyFn) {
        self.entries
            .insert((alg.to_string(), Purpose::Verify), Primitive::Verify(f));
    }

    pub fn supports(&self, alg: &str, purpose: Purpose) -> bool {
        self.entries
            .contains_key(&(tokens::canonicalize(alg).to_string(), purpose))
    }

    fn lookup(&self, alg: &str, purpose: Purpose) -> Result<&Primitive, CryptoError> {
        self.entries
            .get(&(tokens::canonicalize(alg).to_string(), purpose))
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm {
                alg: alg.to_string(),
                purpose,
            })
    }

    pub fn digest(&self, alg: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.lookup(alg, Purpose::Digest)? {
            Primitive::Digest(f) => Ok(f(data)),
            _ => unreachable!("registry key encodes the purpose"),
        }
    }

    pub fn mac(&self, alg: &str, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.lookup(alg, Purpose::Mac)? {
            Primitive::Mac(f) => f(key, data),
            _ => unreachable!("registry key encodes the purpose"),
        }
    }

    pub fn sign(&self, alg: &str, key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.lookup(alg, Purpose::Sign)? {
            Primitive::Sign(f) => f(key, message),
            _ => unreachable!("registry key encodes the purpose"),
        }
    }

    pub fn verify(
        &self,
        alg: &str,
        key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        match self.lookup(alg, Purpose::Verify)? {
            Primitive::Verify(f) => f(key, message, signature),
            _ => unreachable!("registry key encodes the purpose"),
        }
    }
}

macro_rules! hmac_fn {
    ($name:ident, $digest:ty) => {
        fn $name(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
            let mut mac = <Hmac<$digest>>::new_from_slice(key)
                .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    };
}

hmac_fn!(mac_sha256, Sha256);
hmac_fn!(mac_sha384, Sha384);
hmac_fn!(mac_sha512, Sha512);

fn ed25519_sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let seed: [u8; 32] = key
        .try_into()
        .map_err(|_| CryptoError::KeyRejected("ed25519 seed must be 32 bytes".into()))?;
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    Ok(signing.sign(message).to_bytes().to_vec())
}

fn ed25519_verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public: [u8; 32] = key
        .try_into()
        .map_err(|_| CryptoError::KeyRejected("ed25519 public key must be 32 bytes".into()))?;
    let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public)
        .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
    let signature = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verifying
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

macro_rules! ecdsa_pair {
    ($sign:ident, $verify:ident, $curve:ident) => {
        fn $sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
            let signing = $curve::ecdsa::SigningKey::from_slice(key)
                .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
            let signature: $curve::ecdsa::Signature = signing.sign(message);
            Ok(signature.to_bytes().to_vec())
        }

        fn $verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
            let verifying = $curve::ecdsa::VerifyingKey::from_sec1_bytes(key)
                .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
            let signature = $curve::ecdsa::Signature::from_slice(signature)
                .map_err(|_| CryptoError::SignatureInvalid)?;
            verifying
                .verify(message, &signature)
                .map_err(|_| CryptoError::SignatureInvalid)
        }
    };
}

ecdsa_pair!(es256_sign, es256_verify, p256);
ecdsa_pair!(es384_sign, es384_verify, p384);
ecdsa_pair!(es256k_sign, es256k_verify, k256);

fn rs256_sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let private = rsa::RsaPrivateKey::from_pkcs1_der(key)
        .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
    let signing = rsa::pkcs1v15::SigningKey::<Sha256>::new(private);
    Ok(signing.sign(message).to_vec())
}

fn rs256_verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public = rsa::RsaPublicKey::from_pkcs1_der(key)
        .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
    let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public);
    let signature = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verifying
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

fn ps256_sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let private = rsa::RsaPrivateKey::from_pkcs1_der(key)
        .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
    let signing = rsa::pss::SigningKey::<Sha256>::new(private);
    let signature = signing
        .try_sign_with_rng(&mut rand_core::OsRng, message)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(signature.to_vec())
}

fn ps256_verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public = rsa::RsaPublicKey::from_pkcs1_der(key)
        .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
    let verifying = rsa::pss::VerifyingKey::<Sha256>::new(public);
    let signature = rsa::pss::Signature::try_from(signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verifying
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}
