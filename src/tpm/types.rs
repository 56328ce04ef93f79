//! Wire-level constants of the TPM 2.0 protocol: structure tags, command
//! codes, algorithm identifiers, handle ranges, and attribute flags. Values
//! are as tabulated in the TCG TPM 2.0 Structures specification.

use bitflags::bitflags;
use strum_macros::FromRepr;

/// `TPM_ST`: the tag that opens every command and response.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Tag {
    /// `TPM_ST_RSP_COMMAND`: 1.2-style response to a malformed header.
    RspCommand = 0x00C4,
    /// `TPM_ST_NO_SESSIONS`
    NoSessions = 0x8001,
    /// `TPM_ST_SESSIONS`
    Sessions = 0x8002,
}

/// `TPM_CC` values for the commands this crate speaks, plus neighbors that
/// a registry extension is most likely to add first.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandCode {
    /// `TPM_CC_CreatePrimary`
    CreatePrimary = 0x0000_0131,
    /// `TPM_CC_IncrementalSelfTest`
    IncrementalSelfTest = 0x0000_0142,
    /// `TPM_CC_SelfTest`
    SelfTest = 0x0000_0143,
    /// `TPM_CC_Startup`
    Startup = 0x0000_0144,
    /// `TPM_CC_Shutdown`
    Shutdown = 0x0000_0145,
    /// `TPM_CC_StirRandom`
    StirRandom = 0x0000_0146,
    /// `TPM_CC_FlushContext`
    FlushContext = 0x0000_0165,
    /// `TPM_CC_ReadPublic`
    ReadPublic = 0x0000_0173,
    /// `TPM_CC_StartAuthSession`
    StartAuthSession = 0x0000_0176,
    /// `TPM_CC_GetCapability`
    GetCapability = 0x0000_017A,
    /// `TPM_CC_GetRandom`
    GetRandom = 0x0000_017B,
    /// `TPM_CC_GetTestResult`
    GetTestResult = 0x0000_017C,
    /// `TPM_CC_PCR_Read`
    PcrRead = 0x0000_017E,
    /// `TPM_CC_PCR_Extend`
    PcrExtend = 0x0000_0182,
}

/// `TPM_SU`: startup/shutdown modes.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StartupType {
    /// `TPM_SU_CLEAR`
    Clear = 0x0000,
    /// `TPM_SU_STATE`
    State = 0x0001,
}

/// `TPM_ALG_ID` subset used on this crate's wire paths.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AlgId {
    /// `TPM_ALG_ERROR`
    Error = 0x0000,
    /// `TPM_ALG_RSA`
    Rsa = 0x0001,
    /// `TPM_ALG_SHA1`
    Sha1 = 0x0004,
    /// `TPM_ALG_HMAC`
    Hmac = 0x0005,
    /// `TPM_ALG_AES`
    Aes = 0x0006,
    /// `TPM_ALG_KEYEDHASH`
    KeyedHash = 0x0008,
    /// `TPM_ALG_XOR`
    Xor = 0x000A,
    /// `TPM_ALG_SHA256`
    Sha256 = 0x000B,
    /// `TPM_ALG_SHA384`
    Sha384 = 0x000C,
    /// `TPM_ALG_SHA512`
    Sha512 = 0x000D,
    /// `TPM_ALG_NULL`
    Null = 0x0010,
    /// `TPM_ALG_RSASSA`
    Rsassa = 0x0014,
    /// `TPM_ALG_RSAPSS`
    Rsapss = 0x0016,
    /// `TPM_ALG_ECDSA`
    Ecdsa = 0x0018,
    /// `TPM_ALG_ECC`
    Ecc = 0x0023,
    /// `TPM_ALG_SYMCIPHER`
    SymCipher = 0x0025,
    /// `TPM_ALG_CFB`
    Cfb = 0x0043,
}

impl AlgId {
    /// Digest length for the hash algorithms, `None` for everything else.
    pub fn digest_len(self) -> Option<usize> {
        match self {
            AlgId::Sha1 => Some(20),
            AlgId::Sha256 => Some(32),
            AlgId::Sha384 => Some(48),
            AlgId::Sha512 => Some(64),
            _ => None,
        }
    }
}

/// `TPM_SE`: session kind requested from `StartAuthSession`.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionType {
    /// `TPM_SE_HMAC`
    Hmac = 0x00,
    /// `TPM_SE_POLICY`
    Policy = 0x01,
    /// `TPM_SE_TRIAL`
    Trial = 0x03,
}

/// `TPM_ECC_CURVE`
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EccCurve {
    /// `TPM_ECC_NIST_P256`
    NistP256 = 0x0003,
    /// `TPM_ECC_NIST_P384`
    NistP384 = 0x0004,
    /// `TPM_ECC_NIST_P521`
    NistP521 = 0x0005,
    /// `TPM_ECC_BN_P256`
    BnP256 = 0x0010,
    /// `TPM_ECC_SM2_P256`
    Sm2P256 = 0x0020,
}

/// `TPM_CAP`: discriminator for `GetCapability`.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Capability {
    /// `TPM_CAP_ALGS`
    Algs = 0x0000_0000,
    /// `TPM_CAP_HANDLES`
    Handles = 0x0000_0001,
    /// `TPM_CAP_COMMANDS`
    Commands = 0x0000_0002,
    /// `TPM_CAP_PCRS`
    Pcrs = 0x0000_0005,
    /// `TPM_CAP_TPM_PROPERTIES`
    TpmProperties = 0x0000_0006,
    /// `TPM_CAP_PCR_PROPERTIES`
    PcrProperties = 0x0000_0007,
    /// `TPM_CAP_ECC_CURVES`
    EccCurves = 0x0000_0008,
}

/// `TPM_PT_GROUP` stride: fixed properties live at `PT_GROUP * 1`,
/// variable properties at `PT_GROUP * 2`.
pub const PT_GROUP: u32 = 0x0000_0100;
/// `TPM_PT_FIXED`: first fixed property.
pub const PT_FIXED: u32 = PT_GROUP;
/// `TPM_PT_VAR`: first variable property.
pub const PT_VAR: u32 = PT_GROUP * 2;

/// `TPM_HT`: handle class encoded in the most significant byte.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleClass {
    /// `TPM_HT_PCR`
    Pcr = 0x00,
    /// `TPM_HT_NV_INDEX`
    NvIndex = 0x01,
    /// `TPM_HT_HMAC_SESSION`
    HmacSession = 0x02,
    /// `TPM_HT_POLICY_SESSION`
    PolicySession = 0x03,
    /// `TPM_HT_PERMANENT`
    Permanent = 0x40,
    /// `TPM_HT_TRANSIENT`
    Transient = 0x80,
    /// `TPM_HT_PERSISTENT`
    Persistent = 0x81,
}

/// A raw TPM handle. The upper byte tells whether the referent is a
/// transient object, a session, an NV index, or a permanent entity, which
/// in turn decides whether it must eventually be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TpmHandle(pub u32);

impl TpmHandle {
    /// `TPM_RH_OWNER`
    pub const OWNER: TpmHandle = TpmHandle(0x4000_0001);
    /// `TPM_RH_NULL`
    pub const NULL: TpmHandle = TpmHandle(0x4000_0007);
    /// `TPM_RS_PW`: the reserved password-session handle.
    pub const PASSWORD: TpmHandle = TpmHandle(0x4000_0009);
    /// `TPM_RH_LOCKOUT`
    pub const LOCKOUT: TpmHandle = TpmHandle(0x4000_000A);
    /// `TPM_RH_ENDORSEMENT`
    pub const ENDORSEMENT: TpmHandle = TpmHandle(0x4000_000B);
    /// `TPM_RH_PLATFORM`
    pub const PLATFORM: TpmHandle = TpmHandle(0x4000_000C);
    /// First transient object handle.
    pub const TRANSIENT_FIRST: TpmHandle = TpmHandle(0x8000_0000);
    /// First persistent object handle.
    pub const PERSISTENT_FIRST: TpmHandle = TpmHandle(0x8100_0000);

    pub fn class(self) -> Option<HandleClass> {
        HandleClass::from_repr((self.0 >> 24) as u8)
    }

    /// Transient objects and sessions occupy TPM memory until flushed;
    /// permanent and PCR handles never need (or accept) a flush.
    pub fn needs_flush(self) -> bool {
        matches!(
            self.class(),
            Some(HandleClass::Transient)
                | Some(HandleClass::HmacSession)
                | Some(HandleClass::PolicySession)
        )
    }
}

impl From<u32> for TpmHandle {
    fn from(value: u32) -> Self {
        TpmHandle(value)
    }
}

impl std::fmt::Display for TpmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// `TPMA_SESSION`: the per-authorization attributes byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionAttributes: u8 {
        /// Keep the session alive after this command.
        const CONTINUE_SESSION = 0x01;
        /// Audit session becomes exclusive.
        const AUDIT_EXCLUSIVE = 0x02;
        /// Reset the audit digest.
        const AUDIT_RESET = 0x04;
        /// First parameter is encrypted caller-to-TPM.
        const DECRYPT = 0x20;
        /// First response parameter is encrypted TPM-to-caller.
        const ENCRYPT = 0x40;
        /// Session is an audit session.
        const AUDIT = 0x80;
    }
}

bitflags! {
    /// `TPMA_OBJECT`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectAttributes: u32 {
        /// Hierarchy is immutable.
        const FIXED_TPM = 0x0000_0002;
        /// Saved contexts die with a TPM reset.
        const ST_CLEAR = 0x0000_0004;
        /// Parent is immutable.
        const FIXED_PARENT = 0x0000_0010;
        /// Secret came from the TPM's own RNG.
        const SENSITIVE_DATA_ORIGIN = 0x0000_0020;
        /// Auth value alone grants user access.
        const USER_WITH_AUTH = 0x0000_0040;
        /// Admin role requires a policy session.
        const ADMIN_WITH_POLICY = 0x0000_0080;
        /// Exempt from dictionary-attack lockout.
        const NO_DA = 0x0000_0400;
        /// Duplication requires an inner wrapper.
        const ENCRYPTED_DUPLICATION = 0x0000_0800;
        /// Key operates only on TPM-generated structures.
        const RESTRICTED = 0x0001_0000;
        /// Private key may decrypt.
        const DECRYPT = 0x0002_0000;
        /// Private key may sign.
        const SIGN_ENCRYPT = 0x0004_0000;
    }
}
