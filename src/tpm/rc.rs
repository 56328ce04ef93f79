//! TPM 2.0 response-code taxonomy. A raw `u32` from the response header is
//! split into its format, base cause, and (for format-one codes) the
//! parameter/handle/session slot it points at, per section 6.6 of the TPM
//! 2.0 Structures specification.

use strum_macros::FromRepr;

/// Format-one marker: bit 7.
pub const RC_FMT1: u32 = 0x080;
/// Version-one (TPM 2.0 format-zero) marker: bit 8.
pub const RC_VER1: u32 = 0x100;
/// Warning subclass marker: bits 8 and 11.
pub const RC_WARN: u32 = 0x900;
/// Vendor-specific marker: bit 10.
pub const RC_VENDOR: u32 = 0x400;

const FMT1_PARAMETER: u32 = 0x040;
const FMT1_INDEX_SHIFT: u32 = 8;
const FMT1_INDEX_MASK: u32 = 0xF00;

/// Base causes, with the format bits folded in so each variant carries its
/// canonical numeric value.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RcBase {
    Success = 0x000,
    BadTag = 0x01E,

    // Format zero.
    Initialize = RC_VER1,
    Failure = RC_VER1 + 0x001,
    Sequence = RC_VER1 + 0x003,
    Private = RC_VER1 + 0x00B,
    Hmac = RC_VER1 + 0x019,
    Disabled = RC_VER1 + 0x020,
    Exclusive = RC_VER1 + 0x021,
    AuthType = RC_VER1 + 0x024,
    AuthMissing = RC_VER1 + 0x025,
    Policy = RC_VER1 + 0x026,
    Pcr = RC_VER1 + 0x027,
    PcrChanged = RC_VER1 + 0x028,
    Upgrade = RC_VER1 + 0x02D,
    TooManyContexts = RC_VER1 + 0x02E,
    AuthUnavailable = RC_VER1 + 0x02F,
    Reboot = RC_VER1 + 0x030,
    Unbalanced = RC_VER1 + 0x031,
    CommandSize = RC_VER1 + 0x042,
    CommandCode = RC_VER1 + 0x043,
    AuthSize = RC_VER1 + 0x044,
    AuthContext = RC_VER1 + 0x045,
    NvRange = RC_VER1 + 0x046,
    NvSize = RC_VER1 + 0x047,
    NvLocked = RC_VER1 + 0x048,
    NvAuthorization = RC_VER1 + 0x049,
    NvUninitialized = RC_VER1 + 0x04A,
    NvSpace = RC_VER1 + 0x04B,
    NvDefined = RC_VER1 + 0x04C,
    BadContext = RC_VER1 + 0x050,
    CpHash = RC_VER1 + 0x051,
    Parent = RC_VER1 + 0x052,
    NeedsTest = RC_VER1 + 0x053,
    NoResult = RC_VER1 + 0x054,
    Sensitive = RC_VER1 + 0x055,

    // Format one.
    Asymmetric = RC_FMT1 + 0x001,
    Attributes = RC_FMT1 + 0x002,
    Hash = RC_FMT1 + 0x003,
    Value = RC_FMT1 + 0x004,
    Hierarchy = RC_FMT1 + 0x005,
    KeySize = RC_FMT1 + 0x007,
    Mgf = RC_FMT1 + 0x008,
    Mode = RC_FMT1 + 0x009,
    Type = RC_FMT1 + 0x00A,
    Handle = RC_FMT1 + 0x00B,
    Kdf = RC_FMT1 + 0x00C,
    Range = RC_FMT1 + 0x00D,
    AuthFail = RC_FMT1 + 0x00E,
    Nonce = RC_FMT1 + 0x00F,
    Pp = RC_FMT1 + 0x010,
    Scheme = RC_FMT1 + 0x012,
    Size = RC_FMT1 + 0x015,
    Symmetric = RC_FMT1 + 0x016,
    Tag = RC_FMT1 + 0x017,
    Selector = RC_FMT1 + 0x018,
    Insufficient = RC_FMT1 + 0x01A,
    Signature = RC_FMT1 + 0x01B,
    Key = RC_FMT1 + 0x01C,
    PolicyFail = RC_FMT1 + 0x01D,
    Integrity = RC_FMT1 + 0x01F,
    Ticket = RC_FMT1 + 0x020,
    ReservedBits = RC_FMT1 + 0x021,
    BadAuth = RC_FMT1 + 0x022,
    Expired = RC_FMT1 + 0x023,
    PolicyCc = RC_FMT1 + 0x024,
    Binding = RC_FMT1 + 0x025,
    Curve = RC_FMT1 + 0x026,
    EccPoint = RC_FMT1 + 0x027,

    // Warnings.
    ContextGap = RC_WARN + 0x001,
    ObjectMemory = RC_WARN + 0x002,
    SessionMemory = RC_WARN + 0x003,
    Memory = RC_WARN + 0x004,
    SessionHandles = RC_WARN + 0x005,
    ObjectHandles = RC_WARN + 0x006,
    Locality = RC_WARN + 0x007,
    Yielded = RC_WARN + 0x008,
    Canceled = RC_WARN + 0x009,
    Testing = RC_WARN + 0x00A,
    ReferenceH0 = RC_WARN + 0x010,
    ReferenceH1 = RC_WARN + 0x011,
    ReferenceH2 = RC_WARN + 0x012,
    ReferenceH3 = RC_WARN + 0x013,
    ReferenceH4 = RC_WARN + 0x014,
    ReferenceH5 = RC_WARN + 0x015,
    ReferenceH6 = RC_WARN + 0x016,
    ReferenceS0 = RC_WARN + 0x018,
    ReferenceS1 = RC_WARN + 0x019,
    ReferenceS2 = RC_WARN + 0x01A,
    ReferenceS3 = RC_WARN + 0x01B,
    ReferenceS4 = RC_WARN + 0x01C,
    ReferenceS5 = RC_WARN + 0x01D,
    ReferenceS6 = RC_WARN + 0x01E,
    NvRate = RC_WARN + 0x020,
    Lockout = RC_WARN + 0x021,
    Retry = RC_WARN + 0x022,
    NvUnavailable = RC_WARN + 0x023,
    NotUsed = RC_WARN + 0x07F,
}

/// Which slot of the command a format-one code points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcLocation {
    /// 1-based index into the parameter area.
    Parameter(u8),
    /// 1-based index into the handle list.
    Handle(u8),
    /// 1-based index into the authorization area.
    Session(u8),
}

/// A decoded TPM response code. Keeps the raw value so vendor bits and
/// slot indices survive the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmRc(pub u32);

impl TpmRc {
    pub const SUCCESS: TpmRc = TpmRc(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn is_format_one(self) -> bool {
        self.0 & RC_FMT1 != 0
    }

    pub fn is_warning(self) -> bool {
        !self.is_format_one() && self.0 & RC_WARN == RC_WARN
    }

    pub fn is_vendor(self) -> bool {
        !self.is_format_one() && self.0 & RC_VENDOR != 0
    }

    /// The warnings a caller may reasonably resubmit after.
    pub fn is_retryable(self) -> bool {
        matches!(
            self.base(),
            RcBase::Retry | RcBase::Testing | RcBase::Yielded | RcBase::NvRate
        )
    }

    /// Strips the slot index (format one) or masks down to the defined
    /// code range (format zero). Unknown values map to `NotUsed`, which a
    /// conformant TPM never sends.
    pub fn base(self) -> RcBase {
        let masked = if self.is_format_one() {
            self.0 & (0x3F | RC_FMT1)
        } else if self.0 & RC_WARN == RC_WARN {
            self.0 & (0x7F | RC_WARN)
        } else if self.0 & RC_VER1 != 0 {
            self.0 & (0x7F | RC_VER1)
        } else {
            self.0 & 0x7F
        };
        RcBase::from_repr(masked).unwrap_or(RcBase::NotUsed)
    }

    /// For format-one codes, the parameter/handle/session slot. `None` for
    /// format zero or when no index was encoded.
    pub fn location(self) -> Option<RcLocation> {
        if !self.is_format_one() {
            return None;
        }
        let n = ((self.0 & FMT1_INDEX_MASK) >> FMT1_INDEX_SHIFT) as u8;
        if self.0 & FMT1_PARAMETER != 0 {
            if n == 0 {
                return None;
            }
            return Some(RcLocation::Parameter(n));
        }
        match n {
            0 => None,
            1..=7 => Some(RcLocation::Handle(n)),
            _ => Some(RcLocation::Session(n - 7)),
        }
    }
}

impl From<u32> for TpmRc {
    fn from(value: u32) -> Self {
        TpmRc(value)
    }
}

impl std::fmt::Display for TpmRc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base().name())?;
        match self.location() {
            Some(RcLocation::Parameter(n)) => write!(f, " (parameter {n})"),
            Some(RcLocation::Handle(n)) => write!(f, " (handle {n})"),
            Some(RcLocation::Session(n)) => write!(f, " (session {n})"),
            None if self.is_vendor() => write!(f, " (vendor {:#010x})", self.0),
            None => Ok(()),
        }
    }
}

impl RcBase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "TPM_RC_SUCCESS",
            Self::BadTag => "TPM_RC_BAD_TAG",
            Self::Initialize => "TPM_RC_INITIALIZE",
            Self::Failure => "TPM_RC_FAILURE",
            Self::Sequence => "TPM_RC_SEQUENCE",
            Self::Private => "TPM_RC_PRIVATE",
            Self::Hmac => "TPM_RC_HMAC",
            Self::Disabled => "TPM_RC_DISABLED",
            Self::Exclusive => "TPM_RC_EXCLUSIVE",
            Self::AuthType => "TPM_RC_AUTH_TYPE",
            Self::AuthMissing => "TPM_RC_AUTH_MISSING",
            Self::Policy => "TPM_RC_POLICY",
            Self::Pcr => "TPM_RC_PCR",
            Self::PcrChanged => "TPM_RC_PCR_CHANGED",
            Self::Upgrade => "TPM_RC_UPGRADE",
            Self::TooManyContexts => "TPM_RC_TOO_MANY_CONTEXTS",
            Self::AuthUnavailable => "TPM_RC_AUTH_UNAVAILABLE",
            Self::Reboot => "TPM_RC_REBOOT",
            Self::Unbalanced => "TPM_RC_UNBALANCED",
            Self::CommandSize => "TPM_RC_COMMAND_SIZE",
            Self::CommandCode => "TPM_RC_COMMAND_CODE",
            Self::AuthSize => "TPM_RC_AUTHSIZE",
            Self::AuthContext => "TPM_RC_AUTH_CONTEXT",
            Self::NvRange => "TPM_RC_NV_RANGE",
            Self::NvSize => "TPM_RC_NV_SIZE",
            Self::NvLocked => "TPM_RC_NV_LOCKED",
            Self::NvAuthorization => "TPM_RC_NV_AUTHORIZATION",
            Self::NvUninitialized => "TPM_RC_NV_UNINITIALIZED",
            Self::NvSpace => "TPM_RC_NV_SPACE",
            Self::NvDefined => "TPM_RC_NV_DEFINED",
            Self::BadContext => "TPM_RC_BAD_CONTEXT",
            Self::CpHash => "TPM_RC_CPHASH",
            Self::Parent => "TPM_RC_PARENT",
            Self::NeedsTest => "TPM_RC_NEEDS_TEST",
            Self::NoResult => "TPM_RC_NO_RESULT",
            Self::Sensitive => "TPM_RC_SENSITIVE",
            Self::Asymmetric => "TPM_RC_ASYMMETRIC",
            Self::Attributes => "TPM_RC_ATTRIBUTES",
            Self::Hash => "TPM_RC_HASH",
            Self::Value => "TPM_RC_VALUE",
            Self::Hierarchy => "TPM_RC_HIERARCHY",
            Self::KeySize => "TPM_RC_KEY_SIZE",
            Self::Mgf => "TPM_RC_MGF",
            Self::Mode => "TPM_RC_MODE",
            Self::Type => "TPM_RC_TYPE",
            Self::Handle => "TPM_RC_HANDLE",
            Self::Kdf => "TPM_RC_KDF",
            Self::Range => "TPM_RC_RANGE",
            Self::AuthFail => "TPM_RC_AUTH_FAIL",
            Self::Nonce => "TPM_RC_NONCE",
            Self::Pp => "TPM_RC_PP",
            Self::Scheme => "TPM_RC_SCHEME",
            Self::Size => "TPM_RC_SIZE",
            Self::Symmetric => "TPM_RC_SYMMETRIC",
            Self::Tag => "TPM_RC_TAG",
            Self::Selector => "TPM_RC_SELECTOR",
            Self::Insufficient => "TPM_RC_INSUFFICIENT",
            Self::Signature => "TPM_RC_SIGNATURE",
            Self::Key => "TPM_RC_KEY",
            Self::PolicyFail => "TPM_RC_POLICY_FAIL",
            Self::Integrity => "TPM_RC_INTEGRITY",
            Self::Ticket => "TPM_RC_TICKET",
            Self::ReservedBits => "TPM_RC_RESERVED_BITS",
            Self::BadAuth => "TPM_RC_BAD_AUTH",
            Self::Expired => "TPM_RC_EXPIRED",
            Self::PolicyCc => "TPM_RC_POLICY_CC",
            Self::Binding => "TPM_RC_BINDING",
            Self::Curve => "TPM_RC_CURVE",
            Self::EccPoint => "TPM_RC_ECC_POINT",
            Self::ContextGap => "TPM_RC_CONTEXT_GAP",
            Self::ObjectMemory => "TPM_RC_OBJECT_MEMORY",
            Self::SessionMemory => "TPM_RC_SESSION_MEMORY",
            Self::Memory => "TPM_RC_MEMORY",
            Self::SessionHandles => "TPM_RC_SESSION_HANDLES",
            Self::ObjectHandles => "TPM_RC_OBJECT_HANDLES",
            Self::Locality => "TPM_RC_LOCALITY",
            Self::Yielded => "TPM_RC_YIELDED",
            Self::Canceled => "TPM_RC_CANCELED",
            Self::Testing => "TPM_RC_TESTING",
            Self::ReferenceH0 => "TPM_RC_REFERENCE_H0",
            Self::ReferenceH1 => "TPM_RC_REFERENCE_H1",
            Self::ReferenceH2 => "TPM_RC_REFERENCE_H2",
            Self::ReferenceH3 => "TPM_RC_REFERENCE_H3",
            Self::ReferenceH4 => "TPM_RC_REFERENCE_H4",
            Self::ReferenceH5 => "TPM_RC_REFERENCE_H5",
            Self::ReferenceH6 => "TPM_RC_REFERENCE_H6",
            Self::ReferenceS0 => "TPM_RC_REFERENCE_S0",
            Self::ReferenceS1 => "TPM_RC_REFERENCE_S1",
            Self::ReferenceS2 => "TPM_RC_REFERENCE_S2",
            Self::ReferenceS3 => "TPM_RC_REFERENCE_S3",
            Self::ReferenceS4 => "TPM_RC_REFERENCE_S4",
            Self::ReferenceS5 => "TPM_RC_REFERENCE_S5",
            Self::ReferenceS6 => "TPM_RC_REFERENCE_S6",
            Self::NvRate => "TPM_RC_NV_RATE",
            Self::Lockout => "TPM_RC_LOCKOUT",
            Self::Retry => "TPM_RC_RETRY",
            Self::NvUnavailable => "TPM_RC_NV_UNAVAILABLE",
            Self::NotUsed => "TPM_RC_NOT_USED",
        }
    }
}
