//! Authorization sessions: the password pseudo-session, HMAC sessions, and
//! policy sessions. A session owns its nonce state; the executor feeds it
//! the command and response parameter hashes and the session produces or
//! checks the authorization structures that ride along on the wire.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::sensitive::{SensitiveBuffer, SensitivePool};
use crate::tpm::types::{AlgId, SessionAttributes, SessionType, TpmHandle};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session: already destroyed")]
    SessionDestroyed,
    #[error("session: response authorization failed verification")]
    NonceMismatch,
    #[error("session: attributes {0:#04x} conflict with session kind")]
    AttributesConflict(u8),
    #[error("session: hash algorithm {0:?} has no digest")]
    BadHashAlg(AlgId),
    #[error("session: nonce source unavailable")]
    NonceUnavailable,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Authorization structure sent with a command, one per session.
#[derive(Debug, Clone)]
pub struct CommandAuth {
    pub session_handle: TpmHandle,
    pub nonce: Vec<u8>,
    pub attributes: SessionAttributes,
    pub hmac: Vec<u8>,
}

impl CommandAuth {
    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(self.session_handle.0);
        w.write_tpm2b(&self.nonce)?;
        w.write_u8(self.attributes.bits());
        w.write_tpm2b(&self.hmac)
    }
}

/// Authorization structure returned in a response, one per session, in
/// command order. No handle on the way back.
#[derive(Debug, Clone)]
pub struct ResponseAuth {
    pub nonce: Vec<u8>,
    pub attributes: SessionAttributes,
    pub hmac: Vec<u8>,
}

impl ResponseAuth {
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let nonce = r.read_tpm2b()?.to_vec();
        let attributes = SessionAttributes::from_bits_retain(r.read_u8()?);
        let hmac = r.read_tpm2b()?.to_vec();
        Ok(Self {
            nonce,
            attributes,
            hmac,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Destroyed,
    Broken,
}

/// A live authorization session. Password sessions never touch the TPM;
/// HMAC and policy sessions wrap a handle returned by `StartAuthSession`
/// and stay valid until flushed or until a command clears the continue
/// attribute.
pub struct Session {
    handle: TpmHandle,
    kind: SessionType,
    hash_alg: AlgId,
    attributes: SessionAttributes,
    nonce_caller: Vec<u8>,
    nonce_tpm: Vec<u8>,
    session_key: Option<SensitiveBuffer>,
    auth_value: Option<SensitiveBuffer>,
    state: SessionState,
}

impl Session {
    /// The password pseudo-session: reserved handle, empty nonces, zero
    /// attributes, the plaintext auth value riding in the hmac slot.
    pub fn password(auth_value: &[u8]) -> Self {
        Self {
            handle: TpmHandle::PASSWORD,
            kind: SessionType::Hmac,
            hash_alg: AlgId::Null,
            attributes: SessionAttributes::empty(),
            nonce_caller: Vec::new(),
            nonce_tpm: Vec::new(),
            session_key: None,
            auth_value: Some(SensitivePool::shared().rent_copy(auth_value)),
            state: SessionState::Active,
        }
    }

    /// Wraps the handle and first nonce-TPM returned by `StartAuthSession`.
    pub fn started(
        handle: TpmHandle,
        kind: SessionType,
        hash_alg: AlgId,
        nonce_tpm: Vec<u8>,
    ) -> Result<Self, SessionError> {
        hash_alg
            .digest_len()
            .ok_or(SessionError::BadHashAlg(hash_alg))?;
        Ok(Self {
            handle,
            kind,
            hash_alg,
            attributes: SessionAttributes::CONTINUE_SESSION,
            nonce_caller: Vec::new(),
            nonce_tpm,
            session_key: None,
            auth_value: None,
            state: SessionState::Active,
        })
    }

    /// Auth value of the entity being authorized; keys the HMAC for
    /// unbound sessions.
    pub fn with_auth_value(mut self, auth_value: &[u8]) -> Self {
        self.auth_value = Some(SensitivePool::shared().rent_copy(auth_value));
        self
    }

    /// Session key derived from bind entity and salt at session start.
    pub fn with_session_key(mut self, key: SensitiveBuffer) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn with_attributes(mut self, attributes: SessionAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn handle(&self) -> TpmHandle {
        self.handle
    }

    pub fn hash_alg(&self) -> AlgId {
        self.hash_alg
    }

    pub fn is_password(&self) -> bool {
        self.handle == TpmHandle::PASSWORD
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn nonce_tpm(&self) -> &[u8] {
        &self.nonce_tpm
    }

    pub fn nonce_caller(&self) -> &[u8] {
        &self.nonce_caller
    }

    /// Produces the authorization for the next command. HMAC sessions roll
    /// a fresh nonce-caller of digest length first; the nonce-TPM from the
    /// previous response is what keys the rolling window.
    pub fn begin_auth(&mut self, cp_hash: &[u8]) -> Result<CommandAuth, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::SessionDestroyed);
        }

        if self.is_password() {
            let forbidden = SessionAttributes::DECRYPT
                | SessionAttributes::ENCRYPT
                | SessionAttributes::AUDIT;
            if self.attributes.intersects(forbidden) {
                return Err(SessionError::AttributesConflict(self.attributes.bits()));
            }
            return Ok(CommandAuth {
                session_handle: self.handle,
                nonce: Vec::new(),
                attributes: self.attributes,
                hmac: self
                    .auth_value
                    .as_ref()
                    .map(|v| v.as_ref().to_vec())
                    .unwrap_or_default(),
            });
        }

        let digest_len = self
            .hash_alg
            .digest_len()
            .ok_or(SessionError::BadHashAlg(self.hash_alg))?;
        let mut nonce = vec![0u8; digest_len];
        getrandom::getrandom(&mut nonce).map_err(|_| SessionError::NonceUnavailable)?;
        self.nonce_caller = nonce;

        let hmac = match self.kind {
            SessionType::Hmac => self.auth_hmac(
                cp_hash,
                &self.nonce_caller.clone(),
                &self.nonce_tpm.clone(),
            )?,
            // A bare policy session authorizes by policy alone.
            SessionType::Policy | SessionType::Trial => Vec::new(),
        };

        Ok(CommandAuth {
            session_handle: self.handle,
            nonce: self.nonce_caller.clone(),
            attributes: self.attributes,
            hmac,
        })
    }

    /// Absorbs the matching response authorization: verifies the response
    /// HMAC, rotates nonce-TPM, and retires the session if the TPM cleared
    /// the continue attribute.
    pub fn absorb_response(
        &mut self,
        auth: &ResponseAuth,
        rp_hash: &[u8],
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::SessionDestroyed);
        }
        if self.is_password() {
            return Ok(());
        }

        if self.kind == SessionType::Hmac {
            let expected = self.auth_hmac(rp_hash, &auth.nonce, &self.nonce_caller.clone())?;
            if expected != auth.hmac {
                self.state = SessionState::Broken;
                return Err(SessionError::NonceMismatch);
            }
        }

        self.nonce_tpm = auth.nonce.clone();
        if !auth
            .attributes
            .contains(SessionAttributes::CONTINUE_SESSION)
        {
            // The TPM destroyed the session on use.
            self.state = SessionState::Destroyed;
        }
        Ok(())
    }

    /// A dropped or reordered response breaks the nonce chain for good.
    pub fn mark_broken(&mut self) {
        self.state = SessionState::Broken;
    }

    /// Called by the executor when `FlushContext` succeeds on this handle.
    pub fn mark_flushed(&mut self) {
        self.state = SessionState::Destroyed;
    }

    /// XOR-obfuscates the first parameter of an outgoing command for a
    /// session with the decrypt attribute set. The keystream is
    /// `KDFa(hash, sessionKey || authValue, "XOR", nonceCaller, nonceTPM,
    /// len*8)`, so it is fresh per command. Call after `begin_auth` has
    /// rolled the nonce.
    pub fn obfuscate_parameter(&self, parameter: &mut [u8]) -> Result<(), SessionError> {
        self.xor_parameter(parameter, &self.nonce_caller, &self.nonce_tpm)
    }

    /// Reverses the TPM's XOR obfuscation of the first response parameter
    /// for a session with the encrypt attribute set. The response
    /// keystream uses nonceTPM as the newer nonce.
    pub fn deobfuscate_parameter(&self, parameter: &mut [u8]) -> Result<(), SessionError> {
        self.xor_parameter(parameter, &self.nonce_tpm, &self.nonce_caller)
    }

    fn xor_parameter(
        &self,
        parameter: &mut [u8],
        nonce_newer: &[u8],
        nonce_older: &[u8],
    ) -> Result<(), SessionError> {
        if parameter.is_empty() {
            return Ok(());
        }
        let mut key = Vec::new();
        if let Some(session_key) = &self.session_key {
            key.extend_from_slice(session_key);
        }
        if let Some(auth_value) = &self.auth_value {
            key.extend_from_slice(auth_value);
        }
        let mask = kdf_a(
            self.hash_alg,
            &key,
            b"XOR",
            nonce_newer,
            nonce_older,
            (parameter.len() * 8) as u32,
        )?;
        key.zeroize();
        for (byte, mask_byte) in parameter.iter_mut().zip(mask.iter()) {
            *byte ^= mask_byte;
        }
        Ok(())
    }

    /// `HMAC(sessionKey || authValue, pHash || nonceNewer || nonceOlder ||
    /// sessionAttributes)` over the session's hash algorithm.
    fn auth_hmac(
        &self,
        p_hash: &[u8],
        nonce_newer: &[u8],
        nonce_older: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let mut key = Vec::new();
        if let Some(session_key) = &self.session_key {
            key.extend_from_slice(session_key);
        }
        if let Some(auth_value) = &self.auth_value {
            key.extend_from_slice(auth_value);
        }
        let parts: [&[u8]; 4] = [p_hash, nonce_newer, nonce_older, &[self.attributes.bits()]];
        let out = hmac_over(self.hash_alg, &key, &parts)?;
        key.zeroize();
        Ok(out)
    }
}

/// SP800-108 counter-mode KDF as the TPM specifies it (`KDFa`): each block
/// is `HMAC(key, counter || label || 0x00 || contextU || contextV ||
/// bits)`, counter starting at 1, all integers big-endian.
pub fn kdf_a(
    alg: AlgId,
    key: &[u8],
    label: &[u8],
    context_u: &[u8],
    context_v: &[u8],
    bits: u32,
) -> Result<SensitiveBuffer, SessionError> {
    let digest_len = alg.digest_len().ok_or(SessionError::BadHashAlg(alg))?;
    let out_len = (bits as usize).div_ceil(8);
    let mut out = SensitivePool::shared().rent(out_len);

    let mut filled = 0;
    let mut counter: u32 = 0;
    while filled < out_len {
        counter += 1;
        let parts: [&[u8]; 6] = [
            &counter.to_be_bytes(),
            label,
            &[0u8],
            context_u,
            context_v,
            &bits.to_be_bytes(),
        ];
        let block = hmac_over(alg, key, &parts)?;
        let take = digest_len.min(out_len - filled);
        out[filled..filled + take].copy_from_slice(&block[..take]);
        filled += take;
    }

    // A partial trailing byte keeps only its low-order bits.
    let spare_bits = out_len * 8 - bits as usize;
    if spare_bits > 0 {
        out[0] &= 0xFF >> spare_bits;
    }
    Ok(out)
}

/// Derives the session key of a bound and/or salted session:
/// `KDFa(hash, bindAuth || salt, "ATH", nonceTPM, nonceCaller, bits)`.
/// Unbound, unsalted sessions have no session key at all.
pub fn derive_session_key(
    alg: AlgId,
    bind_auth: &[u8],
    salt: &[u8],
    nonce_tpm: &[u8],
    nonce_caller: &[u8],
) -> Result<Option<SensitiveBuffer>, SessionError> {
    if bind_auth.is_empty() && salt.is_empty() {
        return Ok(None);
    }
    let digest_len = alg.digest_len().ok_or(SessionError::BadHashAlg(alg))?;
    let mut key = Vec::with_capacity(bind_auth.len() + salt.len());
    key.extend_from_slice(bind_auth);
    key.extend_from_slice(salt);
    let session_key = kdf_a(
        alg,
        &key,
        b"ATH",
        nonce_tpm,
        nonce_caller,
        (digest_len * 8) as u32,
    )?;
    key.zeroize();
    Ok(Some(session_key))
}

fn hmac_over(alg: AlgId, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, SessionError> {
    macro_rules! run {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest>>::new_from_slice(key)
                .map_err(|_| SessionError::BadHashAlg(alg))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }
    match alg {
        AlgId::Sha256 => run!(Sha256),
        AlgId::Sha384 => run!(Sha384),
        AlgId::Sha512 => run!(Sha512),
        other => Err(SessionError::BadHashAlg(other)),
    }
}
