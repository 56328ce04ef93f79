//! Typed contracts for the commands the executor ships with: request
//! structs, response structs, their wire codecs, and the convenience
//! methods on [`TpmDevice`] that most callers use instead of raw
//! [`TpmCommand`] values.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::sensitive::{SensitiveBuffer, SensitivePool};
use crate::tpm::executor::{
    digest_over, CommandRegistry, ScopedHandle, TpmCommand, TpmDevice, TpmError,
};
use crate::tpm::session::Session;
use crate::tpm::types::{
    AlgId, Capability, CommandCode, EccCurve, ObjectAttributes, SessionType, StartupType,
    TpmHandle,
};
use std::any::Any;

// ---------------------------------------------------------------------------
// Shared wire structures.

/// `TPMT_SYM_DEF`: symmetric algorithm selector, `Null` or AES-CFB here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymDef {
    pub alg: AlgId,
    pub key_bits: u16,
    pub mode: AlgId,
}

impl SymDef {
    pub const NULL: SymDef = SymDef {
        alg: AlgId::Null,
        key_bits: 0,
        mode: AlgId::Null,
    };

    pub fn aes_cfb(key_bits: u16) -> Self {
        Self {
            alg: AlgId::Aes,
            key_bits,
            mode: AlgId::Cfb,
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.alg as u16);
        if self.alg != AlgId::Null {
            w.write_u16(self.key_bits);
            w.write_u16(self.mode as u16);
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let alg_raw = r.read_u16()?;
        let alg = AlgId::from_repr(alg_raw).ok_or(CodecError::UnexpectedTag(alg_raw))?;
        if alg == AlgId::Null {
            return Ok(Self::NULL);
        }
        let key_bits = r.read_u16()?;
        let mode_raw = r.read_u16()?;
        let mode = AlgId::from_repr(mode_raw).ok_or(CodecError::UnexpectedTag(mode_raw))?;
        Ok(Self {
            alg,
            key_bits,
            mode,
        })
    }
}

/// `TPMT_*_SCHEME`: an algorithm with an optional hash parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeDef {
    pub alg: AlgId,
    pub hash: AlgId,
}

impl SchemeDef {
    pub const NULL: SchemeDef = SchemeDef {
        alg: AlgId::Null,
        hash: AlgId::Null,
    };

    pub fn signing(alg: AlgId, hash: AlgId) -> Self {
        Self { alg, hash }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.alg as u16);
        if self.alg != AlgId::Null {
            w.write_u16(self.hash as u16);
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let alg_raw = r.read_u16()?;
        let alg = AlgId::from_repr(alg_raw).ok_or(CodecError::UnexpectedTag(alg_raw))?;
        if alg == AlgId::Null {
            return Ok(Self::NULL);
        }
        let hash_raw = r.read_u16()?;
        let hash = AlgId::from_repr(hash_raw).ok_or(CodecError::UnexpectedTag(hash_raw))?;
        Ok(Self { alg, hash })
    }
}

/// Algorithm-specific half of a public area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParams {
    Rsa {
        symmetric: SymDef,
        scheme: SchemeDef,
        key_bits: u16,
        /// Zero on the wire means the default exponent 65537.
        exponent: u32,
    },
    Ecc {
        symmetric: SymDef,
        scheme: SchemeDef,
        curve: EccCurve,
        kdf: SchemeDef,
    },
    KeyedHash {
        scheme: SchemeDef,
    },
}

/// Unique field of a public area; shape follows the key algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicUnique {
    Rsa(Vec<u8>),
    Ecc { x: Vec<u8>, y: Vec<u8> },
    KeyedHash(Vec<u8>),
}

/// `TPMT_PUBLIC`: the template handed to `CreatePrimary` and the public
/// area that comes back from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtPublic {
    pub alg: AlgId,
    pub name_alg: AlgId,
    pub attributes: ObjectAttributes,
    pub auth_policy: Vec<u8>,
    pub parameters: PublicParams,
    pub unique: PublicUnique,
}

impl TpmtPublic {
    /// Restricted-decryption ECC P-256 primary, the common storage-root
    /// template.
    pub fn ecc_storage_template(curve: EccCurve) -> Self {
        Self {
            alg: AlgId::Ecc,
            name_alg: AlgId::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SENSITIVE_DATA_ORIGIN
                | ObjectAttributes::USER_WITH_AUTH
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::DECRYPT,
            auth_policy: Vec::new(),
            parameters: PublicParams::Ecc {
                symmetric: SymDef::aes_cfb(128),
                scheme: SchemeDef::NULL,
                curve,
                kdf: SchemeDef::NULL,
            },
            unique: PublicUnique::Ecc {
                x: Vec::new(),
                y: Vec::new(),
            },
        }
    }

    /// Restricted-signing RSA-2048 primary, the common attestation-key
    /// template.
    pub fn rsa_signing_template() -> Self {
        Self {
            alg: AlgId::Rsa,
            name_alg: AlgId::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SENSITIVE_DATA_ORIGIN
                | ObjectAttributes::USER_WITH_AUTH
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::SIGN_ENCRYPT,
            auth_policy: Vec::new(),
            parameters: PublicParams::Rsa {
                symmetric: SymDef::NULL,
                scheme: SchemeDef::signing(AlgId::Rsassa, AlgId::Sha256),
                key_bits: 2048,
                exponent: 0,
            },
            unique: PublicUnique::Rsa(Vec::new()),
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u16(self.alg as u16);
        w.write_u16(self.name_alg as u16);
        w.write_u32(self.attributes.bits());
        w.write_tpm2b(&self.auth_policy)?;
        match &self.parameters {
            PublicParams::Rsa {
                symmetric,
                scheme,
                key_bits,
                exponent,
            } => {
                symmetric.encode(w);
                scheme.encode(w);
                w.write_u16(*key_bits);
                w.write_u32(*exponent);
            }
            PublicParams::Ecc {
                symmetric,
                scheme,
                curve,
                kdf,
            } => {
                symmetric.encode(w);
                scheme.encode(w);
                w.write_u16(*curve as u16);
                kdf.encode(w);
            }
            PublicParams::KeyedHash { scheme } => {
                scheme.encode(w);
            }
        }
        match &self.unique {
            PublicUnique::Rsa(n) => w.write_tpm2b(n)?,
            PublicUnique::Ecc { x, y } => {
                w.write_tpm2b(x)?;
                w.write_tpm2b(y)?;
            }
            PublicUnique::KeyedHash(d) => w.write_tpm2b(d)?,
        }
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let alg_raw = r.read_u16()?;
        let alg = AlgId::from_repr(alg_raw).ok_or(CodecError::UnexpectedTag(alg_raw))?;
        let name_alg_raw = r.read_u16()?;
        let name_alg =
            AlgId::from_repr(name_alg_raw).ok_or(CodecError::UnexpectedTag(name_alg_raw))?;
        let attributes = ObjectAttributes::from_bits_retain(r.read_u32()?);
        let auth_policy = r.read_tpm2b()?.to_vec();

        let (parameters, unique) = match alg {
            AlgId::Rsa => {
                let symmetric = SymDef::decode(r)?;
                let scheme = SchemeDef::decode(r)?;
                let key_bits = r.read_u16()?;
                let exponent = r.read_u32()?;
                let n = r.read_tpm2b()?.to_vec();
                (
                    PublicParams::Rsa {
                        symmetric,
                        scheme,
                        key_bits,
                        exponent,
                    },
                    PublicUnique::Rsa(n),
                )
            }
            AlgId::Ecc => {
                let symmetric = SymDef::decode(r)?;
                let scheme = SchemeDef::decode(r)?;
                let curve_raw = r.read_u16()?;
                let curve =
                    EccCurve::from_repr(curve_raw).ok_or(CodecError::UnexpectedTag(curve_raw))?;
                let kdf = SchemeDef::decode(r)?;
                let x = r.read_tpm2b()?.to_vec();
                let y = r.read_tpm2b()?.to_vec();
                (
                    PublicParams::Ecc {
                        symmetric,
                        scheme,
                        curve,
                        kdf,
                    },
                    PublicUnique::Ecc { x, y },
                )
            }
            AlgId::KeyedHash => {
                let scheme = SchemeDef::decode(r)?;
                let d = r.read_tpm2b()?.to_vec();
                (PublicParams::KeyedHash { scheme }, PublicUnique::KeyedHash(d))
            }
            other => return Err(CodecError::UnexpectedTag(other as u16)),
        };

        Ok(Self {
            alg,
            name_alg,
            attributes,
            auth_policy,
            parameters,
            unique,
        })
    }

    /// The object's Name: `nameAlg || H_nameAlg(packed public area)`.
    /// Deterministic for a given public area, which is what makes
    /// `CreatePrimary` reproducible for identical templates.
    pub fn name(&self) -> Result<Vec<u8>, TpmError> {
        let mut packed = ByteWriter::new();
        self.encode(&mut packed)?;
        let digest = digest_over(self.name_alg, &[packed.into_vec()])?;
        let mut name = Vec::with_capacity(2 + digest.len());
        name.extend_from_slice(&(self.name_alg as u16).to_be_bytes());
        name.extend_from_slice(&digest);
        Ok(name)
    }
}

/// `TPMS_PCR_SELECTION`: a hash bank plus a bitmap of selected registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrSelection {
    pub hash: AlgId,
    pub select: Vec<u8>,
}

impl PcrSelection {
    pub const SELECT_LEN: usize = 3;

    pub fn new(hash: AlgId, pcrs: &[u32]) -> Self {
        let mut selection = Self {
            hash,
            select: vec![0u8; Self::SELECT_LEN],
        };
        for &pcr in pcrs {
            selection.select_pcr(pcr);
        }
        selection
    }

    pub fn select_pcr(&mut self, pcr: u32) {
        let byte = (pcr / 8) as usize;
        if byte >= self.select.len() {
            self.select.resize(byte + 1, 0);
        }
        self.select[byte] |= 1 << (pcr % 8);
    }

    pub fn deselect_pcr(&mut self, pcr: u32) {
        let byte = (pcr / 8) as usize;
        if byte < self.select.len() {
            self.select[byte] &= !(1 << (pcr % 8));
        }
    }

    pub fn is_selected(&self, pcr: u32) -> bool {
        let byte = (pcr / 8) as usize;
        byte < self.select.len() && self.select[byte] & (1 << (pcr % 8)) != 0
    }

    pub fn selected_pcrs(&self) -> Vec<u32> {
        let mut pcrs = Vec::new();
        for (byte, bits) in self.select.iter().enumerate() {
            for bit in 0..8 {
                if bits & (1 << bit) != 0 {
                    pcrs.push((byte * 8 + bit) as u32);
                }
            }
        }
        pcrs
    }

    pub fn is_empty_selection(&self) -> bool {
        self.select.iter().all(|&b| b == 0)
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.hash as u16);
        w.write_u8(self.select.len() as u8);
        w.write_bytes(&self.select);
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let hash_raw = r.read_u16()?;
        let hash = AlgId::from_repr(hash_raw).ok_or(CodecError::UnexpectedTag(hash_raw))?;
        let len = r.read_u8()? as usize;
        let select = r.read_bytes(len)?.to_vec();
        Ok(Self { hash, select })
    }
}

fn encode_pcr_selection_list(w: &mut ByteWriter, list: &[PcrSelection]) {
    w.write_u32(list.len() as u32);
    for selection in list {
        selection.encode(w);
    }
}

fn decode_pcr_selection_list(r: &mut ByteReader<'_>) -> Result<Vec<PcrSelection>, CodecError> {
    let count = r.read_u32()? as usize;
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(PcrSelection::decode(r)?);
    }
    Ok(list)
}

/// `TPMT_TK_CREATION`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationTicket {
    pub tag: u16,
    pub hierarchy: TpmHandle,
    pub digest: Vec<u8>,
}

impl CreationTicket {
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let tag = r.read_u16()?;
        let hierarchy = TpmHandle(r.read_u32()?);
        let digest = r.read_tpm2b()?.to_vec();
        Ok(Self {
            tag,
            hierarchy,
            digest,
        })
    }
}

// ---------------------------------------------------------------------------
// Command types.

/// `TPM2_Startup`
pub struct Startup {
    pub startup_type: StartupType,
}

impl TpmCommand for Startup {
    type Response = ();

    const CODE: CommandCode = CommandCode::Startup;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u16(self.startup_type as u16);
        Ok(())
    }
}

/// `TPM2_Shutdown`
pub struct Shutdown {
    pub shutdown_type: StartupType,
}

impl TpmCommand for Shutdown {
    type Response = ();

    const CODE: CommandCode = CommandCode::Shutdown;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u16(self.shutdown_type as u16);
        Ok(())
    }
}

/// `TPM2_SelfTest`
pub struct SelfTest {
    pub full_test: bool,
}

impl TpmCommand for SelfTest {
    type Response = ();

    const CODE: CommandCode = CommandCode::SelfTest;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u8(self.full_test as u8);
        Ok(())
    }
}

/// `TPM2_IncrementalSelfTest`
pub struct IncrementalSelfTest {
    pub to_test: Vec<AlgId>,
}

impl TpmCommand for IncrementalSelfTest {
    type Response = IncrementalSelfTestResponse;

    const CODE: CommandCode = CommandCode::IncrementalSelfTest;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(self.to_test.len() as u32);
        for alg in &self.to_test {
            w.write_u16(*alg as u16);
        }
        Ok(())
    }
}

/// Algorithms still queued for testing after the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalSelfTestResponse {
    pub to_do_list: Vec<u16>,
}

/// `TPM2_GetTestResult`
pub struct GetTestResult;

impl TpmCommand for GetTestResult {
    type Response = GetTestResultResponse;

    const CODE: CommandCode = CommandCode::GetTestResult;

    fn encode_parameters(&self, _w: &mut ByteWriter) -> Result<(), CodecError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetTestResultResponse {
    /// Manufacturer-specific diagnostics.
    pub out_data: Vec<u8>,
    pub test_result: crate::tpm::rc::TpmRc,
}

/// `TPM2_StirRandom`
pub struct StirRandom {
    pub in_data: Vec<u8>,
}

impl TpmCommand for StirRandom {
    type Response = ();

    const CODE: CommandCode = CommandCode::StirRandom;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_tpm2b(&self.in_data)
    }
}

/// `TPM2_ReadPublic`
pub struct ReadPublic {
    pub object_handle: TpmHandle,
}

impl TpmCommand for ReadPublic {
    type Response = ReadPublicResponse;

    const CODE: CommandCode = CommandCode::ReadPublic;

    fn handles(&self) -> Vec<TpmHandle> {
        vec![self.object_handle]
    }

    fn encode_parameters(&self, _w: &mut ByteWriter) -> Result<(), CodecError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPublicResponse {
    pub out_public: TpmtPublic,
    pub name: Vec<u8>,
    pub qualified_name: Vec<u8>,
}

/// `TPM2_PCR_Extend`
pub struct PcrExtend {
    pub pcr_handle: TpmHandle,
    /// One digest per bank to extend into the register.
    pub digests: Vec<(AlgId, Vec<u8>)>,
}

impl TpmCommand for PcrExtend {
    type Response = ();

    const CODE: CommandCode = CommandCode::PcrExtend;

    fn handles(&self) -> Vec<TpmHandle> {
        vec![self.pcr_handle]
    }

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        // TPML_DIGEST_VALUES: digests are raw, sized by their algorithm.
        w.write_u32(self.digests.len() as u32);
        for (alg, digest) in &self.digests {
            w.write_u16(*alg as u16);
            w.write_bytes(digest);
        }
        Ok(())
    }
}

/// `TPM2_GetCapability`
pub struct GetCapability {
    pub capability: Capability,
    pub property: u32,
    pub property_count: u32,
}

impl TpmCommand for GetCapability {
    type Response = GetCapabilityResponse;

    const CODE: CommandCode = CommandCode::GetCapability;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(self.capability as u32);
        w.write_u32(self.property);
        w.write_u32(self.property_count);
        Ok(())
    }
}

/// One `TPMS_ALG_PROPERTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgProperty {
    pub alg: u16,
    pub attributes: u32,
}

/// One `TPMS_TAGGED_PROPERTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedProperty {
    pub property: u32,
    pub value: u32,
}

/// The capability-specific payload of a `GetCapability` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityData {
    Algorithms(Vec<AlgProperty>),
    Handles(Vec<TpmHandle>),
    Commands(Vec<u32>),
    Pcrs(Vec<PcrSelection>),
    TpmProperties(Vec<TaggedProperty>),
    EccCurves(Vec<u16>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCapabilityResponse {
    pub more_data: bool,
    pub data: CapabilityData,
}

/// `TPM2_GetRandom`
pub struct GetRandom {
    pub bytes_requested: u16,
}

impl TpmCommand for GetRandom {
    type Response = GetRandomResponse;

    const CODE: CommandCode = CommandCode::GetRandom;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u16(self.bytes_requested);
        Ok(())
    }
}

/// The TPM may return fewer bytes than requested; callers that need an
/// exact amount loop via [`TpmDevice::get_random_exact`].
pub struct GetRandomResponse {
    pub random_bytes: SensitiveBuffer,
}

/// `TPM2_PCR_Read`
pub struct PcrRead {
    pub pcr_selection_in: Vec<PcrSelection>,
}

impl TpmCommand for PcrRead {
    type Response = PcrReadResponse;

    const CODE: CommandCode = CommandCode::PcrRead;

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        encode_pcr_selection_list(w, &self.pcr_selection_in);
        Ok(())
    }
}

/// Not every requested register comes back in one call;
/// `pcr_selection_out` names the ones that did and the caller re-requests
/// the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrReadResponse {
    pub pcr_update_counter: u32,
    pub pcr_selection_out: Vec<PcrSelection>,
    pub pcr_values: Vec<Vec<u8>>,
}

/// `TPM2_CreatePrimary`
pub struct CreatePrimary {
    pub hierarchy: TpmHandle,
    pub user_auth: Vec<u8>,
    pub sensitive_data: Vec<u8>,
    pub public_template: TpmtPublic,
    pub outside_info: Vec<u8>,
    pub creation_pcr: Vec<PcrSelection>,
}

impl TpmCommand for CreatePrimary {
    type Response = CreatePrimaryResponse;

    const CODE: CommandCode = CommandCode::CreatePrimary;

    fn handles(&self) -> Vec<TpmHandle> {
        vec![self.hierarchy]
    }

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        // TPM2B_SENSITIVE_CREATE: outer size, then auth and data.
        let mut sensitive = ByteWriter::new();
        sensitive.write_tpm2b(&self.user_auth)?;
        sensitive.write_tpm2b(&self.sensitive_data)?;
        w.write_tpm2b(sensitive.as_slice())?;

        let mut public = ByteWriter::new();
        self.public_template.encode(&mut public)?;
        w.write_tpm2b(public.as_slice())?;

        w.write_tpm2b(&self.outside_info)?;
        encode_pcr_selection_list(w, &self.creation_pcr);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrimaryResponse {
    pub object_handle: TpmHandle,
    pub out_public: TpmtPublic,
    /// `TPMS_CREATION_DATA`, kept packed; callers needing fields parse it.
    pub creation_data: Vec<u8>,
    pub creation_hash: Vec<u8>,
    pub creation_ticket: CreationTicket,
    pub name: Vec<u8>,
}

/// `TPM2_StartAuthSession`
pub struct StartAuthSession {
    pub tpm_key: TpmHandle,
    pub bind: TpmHandle,
    pub nonce_caller: Vec<u8>,
    pub encrypted_salt: Vec<u8>,
    pub session_type: SessionType,
    pub symmetric: SymDef,
    pub auth_hash: AlgId,
}

impl TpmCommand for StartAuthSession {
    type Response = StartAuthSessionResponse;

    const CODE: CommandCode = CommandCode::StartAuthSession;

    fn handles(&self) -> Vec<TpmHandle> {
        vec![self.tpm_key, self.bind]
    }

    fn encode_parameters(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_tpm2b(&self.nonce_caller)?;
        w.write_tpm2b(&self.encrypted_salt)?;
        w.write_u8(self.session_type as u8);
        self.symmetric.encode(w);
        w.write_u16(self.auth_hash as u16);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAuthSessionResponse {
    pub session_handle: TpmHandle,
    pub nonce_tpm: Vec<u8>,
}

/// `TPM2_FlushContext`
pub struct FlushContext {
    pub flush_handle: TpmHandle,
}

impl TpmCommand for FlushContext {
    type Response = ();

    const CODE: CommandCode = CommandCode::FlushContext;

    fn handles(&self) -> Vec<TpmHandle> {
        vec![self.flush_handle]
    }

    fn encode_parameters(&self, _w: &mut ByteWriter) -> Result<(), CodecError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response decoders and registry population.

fn decode_unit(
    _handles: &[TpmHandle],
    _r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    Ok(Box::new(()))
}

fn decode_get_capability(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let more_data = r.read_u8()? != 0;
    let cap_raw = r.read_u32()?;
    let capability = Capability::from_repr(cap_raw)
        .ok_or(CodecError::UnexpectedTag((cap_raw & 0xFFFF) as u16))?;
    let data = match capability {
        Capability::Algs => {
            let count = r.read_u32()? as usize;
            let mut algs = Vec::with_capacity(count);
            for _ in 0..count {
                algs.push(AlgProperty {
                    alg: r.read_u16()?,
                    attributes: r.read_u32()?,
                });
            }
            CapabilityData::Algorithms(algs)
        }
        Capability::Handles => {
            let count = r.read_u32()? as usize;
            let mut handles = Vec::with_capacity(count);
            for _ in 0..count {
                handles.push(TpmHandle(r.read_u32()?));
            }
            CapabilityData::Handles(handles)
        }
        Capability::Commands => {
            let count = r.read_u32()? as usize;
            let mut commands = Vec::with_capacity(count);
            for _ in 0..count {
                commands.push(r.read_u32()?);
            }
            CapabilityData::Commands(commands)
        }
        Capability::Pcrs => CapabilityData::Pcrs(decode_pcr_selection_list(r)?),
        Capability::TpmProperties | Capability::PcrProperties => {
            let count = r.read_u32()? as usize;
            let mut properties = Vec::with_capacity(count);
            for _ in 0..count {
                properties.push(TaggedProperty {
                    property: r.read_u32()?,
                    value: r.read_u32()?,
                });
            }
            CapabilityData::TpmProperties(properties)
        }
        Capability::EccCurves => {
            let count = r.read_u32()? as usize;
            let mut curves = Vec::with_capacity(count);
            for _ in 0..count {
                curves.push(r.read_u16()?);
            }
            CapabilityData::EccCurves(curves)
        }
    };
    Ok(Box::new(GetCapabilityResponse { more_data, data }))
}

fn decode_get_random(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let bytes = r.read_tpm2b()?;
    Ok(Box::new(GetRandomResponse {
        random_bytes: SensitivePool::shared().rent_copy(bytes),
    }))
}

fn decode_pcr_read(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let pcr_update_counter = r.read_u32()?;
    let pcr_selection_out = decode_pcr_selection_list(r)?;
    let count = r.read_u32()? as usize;
    let mut pcr_values = Vec::with_capacity(count);
    for _ in 0..count {
        pcr_values.push(r.read_tpm2b()?.to_vec());
    }
    Ok(Box::new(PcrReadResponse {
        pcr_update_counter,
        pcr_selection_out,
        pcr_values,
    }))
}

fn decode_create_primary(
    handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let object_handle = *handles.first().ok_or(CodecError::InsufficientBytes {
        needed: 4,
        remaining: 0,
    })?;
    let public_bytes = r.read_tpm2b()?;
    let mut public_reader = ByteReader::new(public_bytes);
    let out_public = TpmtPublic::decode(&mut public_reader)?;
    let creation_data = r.read_tpm2b()?.to_vec();
    let creation_hash = r.read_tpm2b()?.to_vec();
    let creation_ticket = CreationTicket::decode(r)?;
    let name = r.read_tpm2b()?.to_vec();
    Ok(Box::new(CreatePrimaryResponse {
        object_handle,
        out_public,
        creation_data,
        creation_hash,
        creation_ticket,
        name,
    }))
}

fn decode_incremental_self_test(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let count = r.read_u32()? as usize;
    let mut to_do_list = Vec::with_capacity(count);
    for _ in 0..count {
        to_do_list.push(r.read_u16()?);
    }
    Ok(Box::new(IncrementalSelfTestResponse { to_do_list }))
}

fn decode_get_test_result(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let out_data = r.read_tpm2b()?.to_vec();
    let test_result = crate::tpm::rc::TpmRc(r.read_u32()?);
    Ok(Box::new(GetTestResultResponse {
        out_data,
        test_result,
    }))
}

fn decode_read_public(
    _handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let public_bytes = r.read_tpm2b()?;
    let mut public_reader = ByteReader::new(public_bytes);
    let out_public = TpmtPublic::decode(&mut public_reader)?;
    let name = r.read_tpm2b()?.to_vec();
    let qualified_name = r.read_tpm2b()?.to_vec();
    Ok(Box::new(ReadPublicResponse {
        out_public,
        name,
        qualified_name,
    }))
}

fn decode_start_auth_session(
    handles: &[TpmHandle],
    r: &mut ByteReader<'_>,
) -> Result<Box<dyn Any + Send>, TpmError> {
    let session_handle = *handles.first().ok_or(CodecError::InsufficientBytes {
        needed: 4,
        remaining: 0,
    })?;
    let nonce_tpm = r.read_tpm2b()?.to_vec();
    Ok(Box::new(StartAuthSessionResponse {
        session_handle,
        nonce_tpm,
    }))
}

impl CommandRegistry {
    /// The registry with every command this crate ships decoders for.
    pub fn with_core_commands() -> Self {
        let mut registry = Self::new();
        registry.register(CommandCode::Startup, 0, decode_unit);
        registry.register(CommandCode::Shutdown, 0, decode_unit);
        registry.register(CommandCode::SelfTest, 0, decode_unit);
        registry.register(
            CommandCode::IncrementalSelfTest,
            0,
            decode_incremental_self_test,
        );
        registry.register(CommandCode::GetTestResult, 0, decode_get_test_result);
        registry.register(CommandCode::StirRandom, 0, decode_unit);
        registry.register(CommandCode::GetCapability, 0, decode_get_capability);
        registry.register(CommandCode::GetRandom, 0, decode_get_random);
        registry.register(CommandCode::PcrRead, 0, decode_pcr_read);
        registry.register(CommandCode::PcrExtend, 0, decode_unit);
        registry.register(CommandCode::ReadPublic, 0, decode_read_public);
        registry.register(CommandCode::CreatePrimary, 1, decode_create_primary);
        registry.register(CommandCode::StartAuthSession, 1, decode_start_auth_session);
        registry.register(CommandCode::FlushContext, 0, decode_unit);
        registry
    }
}

// ---------------------------------------------------------------------------
// Convenience surface.

impl TpmDevice {
    /// A device over `transport` with the core command set registered.
    pub fn with_transport(transport: Box<dyn crate::tpm::transport::Transport>) -> Self {
        Self::new(transport, CommandRegistry::with_core_commands())
    }

    /// Must be the first command after a reset; a TPM that has not seen it
    /// answers everything else with `TPM_RC_INITIALIZE`.
    pub fn startup(&mut self, startup_type: StartupType) -> Result<(), TpmError> {
        self.execute(&Startup { startup_type })
    }

    /// Orderly shutdown; `State` preserves session contexts for a
    /// matching `Startup(State)`.
    pub fn shutdown(&mut self, shutdown_type: StartupType) -> Result<(), TpmError> {
        self.execute(&Shutdown { shutdown_type })
    }

    pub fn self_test(&mut self, full_test: bool) -> Result<(), TpmError> {
        self.execute(&SelfTest { full_test })
    }

    pub fn incremental_self_test(
        &mut self,
        to_test: Vec<AlgId>,
    ) -> Result<IncrementalSelfTestResponse, TpmError> {
        self.execute(&IncrementalSelfTest { to_test })
    }

    pub fn get_test_result(&mut self) -> Result<GetTestResultResponse, TpmError> {
        self.execute(&GetTestResult)
    }

    /// Mixes caller entropy into the TPM's RNG state.
    pub fn stir_random(&mut self, in_data: &[u8]) -> Result<(), TpmError> {
        self.execute(&StirRandom {
            in_data: in_data.to_vec(),
        })
    }

    pub fn read_public(&mut self, object_handle: TpmHandle) -> Result<ReadPublicResponse, TpmError> {
        self.execute(&ReadPublic { object_handle })
    }

    /// Extends `digest` into a PCR over the given bank, authorized by the
    /// register's own (empty by default) auth value.
    pub fn pcr_extend(
        &mut self,
        pcr: u32,
        bank: AlgId,
        digest: &[u8],
        auth: &mut Session,
    ) -> Result<(), TpmError> {
        self.execute_with_sessions(
            &PcrExtend {
                pcr_handle: TpmHandle(pcr),
                digests: vec![(bank, digest.to_vec())],
            },
            &mut [auth],
        )
    }

    pub fn get_capability(
        &mut self,
        capability: Capability,
        property: u32,
        property_count: u32,
    ) -> Result<GetCapabilityResponse, TpmError> {
        self.execute(&GetCapability {
            capability,
            property,
            property_count,
        })
    }

    /// Walks a tagged-property group page by page, reissuing from
    /// `lastReturnedProperty + 1` while the TPM reports more data.
    pub fn read_tpm_properties(
        &mut self,
        start: u32,
        page_size: u32,
    ) -> Result<Vec<TaggedProperty>, TpmError> {
        let mut all = Vec::new();
        let mut property = start;
        loop {
            let response =
                self.get_capability(Capability::TpmProperties, property, page_size)?;
            let page = match response.data {
                CapabilityData::TpmProperties(page) => page,
                _ => return Err(TpmError::ResponseTypeMismatch),
            };
            let last = page.last().map(|p| p.property);
            all.extend(page);
            if !response.more_data {
                return Ok(all);
            }
            match last {
                Some(last) => property = last + 1,
                // More data promised but an empty page delivered.
                None => return Ok(all),
            }
        }
    }

    pub fn get_random(&mut self, bytes_requested: u16) -> Result<SensitiveBuffer, TpmError> {
        Ok(self
            .execute(&GetRandom { bytes_requested })?
            .random_bytes)
    }

    /// Accumulates exactly `len` random bytes, looping over short reads.
    pub fn get_random_exact(&mut self, len: usize) -> Result<SensitiveBuffer, TpmError> {
        let mut out = SensitivePool::shared().rent(len);
        let mut filled = 0;
        while filled < len {
            let want = (len - filled).min(u16::MAX as usize) as u16;
            let chunk = self.get_random(want)?;
            if chunk.is_empty() {
                return Err(TpmError::Tpm {
                    rc: crate::tpm::rc::TpmRc(crate::tpm::rc::RC_VER1 + 0x054), // TPM_RC_NO_RESULT
                });
            }
            let take = chunk.len().min(len - filled);
            out[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
        }
        Ok(out)
    }

    /// Reads every selected register, re-requesting the remainder until
    /// the TPM has answered for the full selection.
    pub fn pcr_read_all(
        &mut self,
        selection: Vec<PcrSelection>,
    ) -> Result<Vec<(AlgId, u32, Vec<u8>)>, TpmError> {
        let mut outstanding = selection;
        let mut values = Vec::new();
        while outstanding.iter().any(|s| !s.is_empty_selection()) {
            let response = self.execute(&PcrRead {
                pcr_selection_in: outstanding.clone(),
            })?;
            let mut returned = Vec::new();
            for out_selection in &response.pcr_selection_out {
                for pcr in out_selection.selected_pcrs() {
                    returned.push((out_selection.hash, pcr));
                }
            }
            if returned.is_empty() {
                // No progress; a conformant TPM always returns at least one.
                return Err(TpmError::ResponseTypeMismatch);
            }
            for (&(hash, pcr), value) in returned.iter().zip(response.pcr_values.iter()) {
                values.push((hash, pcr, value.clone()));
                for selection in outstanding.iter_mut() {
                    if selection.hash == hash {
                        selection.deselect_pcr(pcr);
                    }
                }
            }
        }
        Ok(values)
    }

    /// Creates a primary object under `hierarchy`, authorizing with
    /// `auth` (commonly an empty-password session).
    pub fn create_primary(
        &mut self,
        hierarchy: TpmHandle,
        template: TpmtPublic,
        auth: &mut Session,
    ) -> Result<CreatePrimaryResponse, TpmError> {
        self.execute_with_sessions(
            &CreatePrimary {
                hierarchy,
                user_auth: Vec::new(),
                sensitive_data: Vec::new(),
                public_template: template,
                outside_info: Vec::new(),
                creation_pcr: Vec::new(),
            },
            &mut [auth],
        )
    }

    /// Starts an unbound, unsalted session of `session_type` and wraps it
    /// in a [`Session`] ready for use.
    pub fn start_plain_session(
        &mut self,
        session_type: SessionType,
        auth_hash: AlgId,
    ) -> Result<Session, TpmError> {
        let digest_len = auth_hash.digest_len().ok_or(TpmError::ResponseTypeMismatch)?;
        let mut nonce_caller = vec![0u8; digest_len];
        getrandom::getrandom(&mut nonce_caller)
            .map_err(|_| crate::tpm::session::SessionError::NonceUnavailable)?;

        let response = self.execute(&StartAuthSession {
            tpm_key: TpmHandle::NULL,
            bind: TpmHandle::NULL,
            nonce_caller,
            encrypted_salt: Vec::new(),
            session_type,
            symmetric: SymDef::NULL,
            auth_hash,
        })?;
        Ok(Session::started(
            response.session_handle,
            session_type,
            auth_hash,
            response.nonce_tpm,
        )?)
    }

    /// Starts a session bound to `bind` so commands against the bind
    /// entity need no further auth value: the session key is derived from
    /// the entity's auth and the opening nonce exchange.
    pub fn start_bound_session(
        &mut self,
        bind: TpmHandle,
        bind_auth: &[u8],
        session_type: SessionType,
        auth_hash: AlgId,
    ) -> Result<Session, TpmError> {
        let digest_len = auth_hash.digest_len().ok_or(TpmError::ResponseTypeMismatch)?;
        let mut nonce_caller = vec![0u8; digest_len];
        getrandom::getrandom(&mut nonce_caller)
            .map_err(|_| crate::tpm::session::SessionError::NonceUnavailable)?;

        let response = self.execute(&StartAuthSession {
            tpm_key: TpmHandle::NULL,
            bind,
            nonce_caller: nonce_caller.clone(),
            encrypted_salt: Vec::new(),
            session_type,
            symmetric: SymDef::NULL,
            auth_hash,
        })?;

        let session_key = crate::tpm::session::derive_session_key(
            auth_hash,
            bind_auth,
            &[],
            &response.nonce_tpm,
            &nonce_caller,
        )?;
        let mut session = Session::started(
            response.session_handle,
            session_type,
            auth_hash,
            response.nonce_tpm,
        )?;
        if let Some(key) = session_key {
            session = session.with_session_key(key);
        }
        Ok(session)
    }

    /// Flushes a transient object or session handle. Flushing twice
    /// surfaces the TPM's `TPM_RC_HANDLE` untouched.
    pub fn flush_context(&mut self, flush_handle: TpmHandle) -> Result<(), TpmError> {
        self.execute(&FlushContext { flush_handle })
    }

    /// Flushes the session's handle and retires the session object.
    pub fn flush_session(&mut self, session: &mut Session) -> Result<(), TpmError> {
        self.flush_context(session.handle())?;
        session.mark_flushed();
        Ok(())
    }

    /// Wraps `handle` so it is flushed on every exit path.
    pub fn scoped(&mut self, handle: TpmHandle) -> ScopedHandle<'_> {
        ScopedHandle::new(self, handle)
    }
}
