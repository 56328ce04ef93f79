//! Interned JOSE identifiers. Each well-known algorithm, curve, key-type,
//! and property string has one canonical `&'static str` instance; matching
//! first tries pointer identity and only then falls back to byte equality,
//! so canonicalized tokens compare in constant time.

use lazy_static::lazy_static;
use std::collections::HashMap;

macro_rules! tokens {
    ($family:ident : $($name:ident = $value:literal),+ $(,)?) => {
        $(pub static $name: &str = $value;)+
        pub static $family: &[&str] = &[$($name),+];
    };
}

tokens! { SIGNATURE_ALGORITHMS:
    HS256 = "HS256",
    HS384 = "HS384",
    HS512 = "HS512",
    RS256 = "RS256",
    RS384 = "RS384",
    RS512 = "RS512",
    ES256 = "ES256",
    ES384 = "ES384",
    ES512 = "ES512",
    ES256K = "ES256K",
    PS256 = "PS256",
    PS384 = "PS384",
    PS512 = "PS512",
    EDDSA = "EdDSA",
    NONE = "none",
}

tokens! { KEY_MANAGEMENT_ALGORITHMS:
    RSA1_5 = "RSA1_5",
    RSA_OAEP = "RSA-OAEP",
    RSA_OAEP_256 = "RSA-OAEP-256",
    A128KW = "A128KW",
    A192KW = "A192KW",
    A256KW = "A256KW",
    DIR = "dir",
    ECDH_ES = "ECDH-ES",
    ECDH_ES_A128KW = "ECDH-ES+A128KW",
    ECDH_ES_A192KW = "ECDH-ES+A192KW",
    ECDH_ES_A256KW = "ECDH-ES+A256KW",
}

tokens! { CONTENT_ENCRYPTION_ALGORITHMS:
    A128CBC_HS256 = "A128CBC-HS256",
    A192CBC_HS384 = "A192CBC-HS384",
    A256CBC_HS512 = "A256CBC-HS512",
    A128GCM = "A128GCM",
    A192GCM = "A192GCM",
    A256GCM = "A256GCM",
}

tokens! { KEY_TYPES:
    EC = "EC",
    OKP = "OKP",
    RSA = "RSA",
    OCT = "oct",
}

tokens! { CURVES:
    P256 = "P-256",
    P384 = "P-384",
    P521 = "P-521",
    SECP256K1 = "secp256k1",
    ED25519 = "Ed25519",
    ED448 = "Ed448",
    X25519 = "X25519",
    X448 = "X448",
}

tokens! { JWK_PROPERTIES:
    KTY = "kty",
    USE = "use",
    KEY_OPS = "key_ops",
    ALG = "alg",
    KID = "kid",
    X5U = "x5u",
    X5C = "x5c",
    X5T = "x5t",
    X5T_S256 = "x5t#S256",
    CRV = "crv",
    X = "x",
    Y = "y",
    D = "d",
    N = "n",
    E = "e",
    K = "k",
}

lazy_static! {
    static ref CANONICAL: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        for family in [
            SIGNATURE_ALGORITHMS,
            KEY_MANAGEMENT_ALGORITHMS,
            CONTENT_ENCRYPTION_ALGORITHMS,
            KEY_TYPES,
            CURVES,
            JWK_PROPERTIES,
        ] {
            for token in family {
                map.insert(*token, *token);
            }
        }
        map
    };
}

/// Returns the canonical instance when `s` equals a well-known token by
/// value, otherwise hands `s` back unchanged.
pub fn canonicalize(s: &str) -> &str {
    CANONICAL.get(s).copied().unwrap_or(s)
}

/// True when `s` is the canonical instance of some well-known token
/// (pointer identity, not value equality).
pub fn is_canonical(s: &str) -> bool {
    CANONICAL
        .get(s)
        .is_some_and(|c| std::ptr::eq(*c as *const str, s as *const str))
}

fn in_family(family: &[&'static str], s: &str) -> bool {
    // Identity hit first; freshly allocated equivalents fall through to
    // ordinal comparison.
    family
        .iter()
        .any(|c| std::ptr::eq(*c as *const str, s as *const str))
        || family.iter().any(|c| *c == s)
}

pub fn is_signature_algorithm(s: &str) -> bool {
    in_family(SIGNATURE_ALGORITHMS, s)
}

pub fn is_key_management_algorithm(s: &str) -> bool {
    in_family(KEY_MANAGEMENT_ALGORITHMS, s)
}

pub fn is_content_encryption_algorithm(s: &str) -> bool {
    in_family(CONTENT_ENCRYPTION_ALGORITHMS, s)
}

pub fn is_key_type(s: &str) -> bool {
    in_family(KEY_TYPES, s)
}

pub fn is_curve(s: &str) -> bool {
    in_family(CURVES, s)
}

pub fn is_jwk_property(s: &str) -> bool {
    in_family(JWK_PROPERTIES, s)
}
