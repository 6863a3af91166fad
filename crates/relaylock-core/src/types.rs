use crate::{
    Result,
    constants::{
        MAX_DEVICE_ID_LENGTH, MAX_LOCK_CODE_LENGTH, MAX_QR_TOKEN_LENGTH, MIN_LOCK_CODE_LENGTH,
        MIN_REARM_DELAY_MS,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Vendor cloud device identifier (1-64 ASCII characters, no whitespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// Surrounding whitespace is trimmed before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the ID is empty, too long, not ASCII
    /// or contains inner whitespace.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();

        if id.is_empty() || id.len() > MAX_DEVICE_ID_LENGTH {
            return Err(Error::InvalidDeviceId {
                message: format!(
                    "Device ID must be 1-{MAX_DEVICE_ID_LENGTH} chars, got {}",
                    id.len()
                ),
            });
        }

        if !id.is_ascii() || id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidDeviceId {
                message: format!("Device ID must be ASCII without spaces: {id}"),
            });
        }

        Ok(DeviceId(id.to_string()))
    }

    /// Get the device ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(&value)
    }
}

/// Human-readable lock code (3-32 characters)
///
/// The code is printed on the lock and typed by users. It is normalized
/// (trimmed and uppercased) so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockCode(String);

impl LockCode {
    /// Create a new lock code with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidLockCode` if the length is outside 3-32 characters
    /// or the code contains non-ASCII characters.
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim().to_uppercase();

        let len = code.len();
        if !(MIN_LOCK_CODE_LENGTH..=MAX_LOCK_CODE_LENGTH).contains(&len) {
            return Err(Error::InvalidLockCode {
                message: format!(
                    "Lock code must be {MIN_LOCK_CODE_LENGTH}-{MAX_LOCK_CODE_LENGTH} chars, got {len}"
                ),
            });
        }

        if !code.is_ascii() {
            return Err(Error::InvalidLockCode {
                message: "Lock code must be ASCII".to_string(),
            });
        }

        Ok(LockCode(code))
    }

    /// Get the lock code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LockCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LockCode::new(s)
    }
}

impl TryFrom<String> for LockCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        LockCode::new(&value)
    }
}

/// QR token encoded on the lock sticker
///
/// # Security
/// The token works as a bearer secret for the lock, so equality uses
/// constant-time comparison.
#[derive(Clone, Eq, Serialize, Deserialize)]
pub struct QrToken(String);

impl QrToken {
    /// Create a new QR token.
    ///
    /// # Errors
    /// Returns `Error::InvalidQrToken` if the token is empty or longer than 128 chars.
    pub fn new(token: &str) -> Result<Self> {
        let token = token.trim();

        if token.is_empty() || token.len() > MAX_QR_TOKEN_LENGTH {
            return Err(Error::InvalidQrToken {
                message: format!(
                    "QR token must be 1-{MAX_QR_TOKEN_LENGTH} chars, got {}",
                    token.len()
                ),
            });
        }

        Ok(QrToken(token.to_string()))
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QrToken {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        QrToken::new(&value)
    }
}

impl fmt::Debug for QrToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("QrToken(****)")
    }
}

impl PartialEq for QrToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for QrToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// The two independent keys a caller can use to find a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockLookup {
    /// Human code typed by the user.
    Code(LockCode),
    /// Token scanned from the QR sticker.
    QrToken(QrToken),
}

impl fmt::Display for LockLookup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockLookup::Code(code) => write!(f, "code={code}"),
            LockLookup::QrToken(_) => write!(f, "qr_token"),
        }
    }
}

/// Defines `as_str`, `Display`, `FromStr` and `TryFrom<String>` for a text-backed enum.
macro_rules! text_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Text representation used in storage and on the wire.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::InvalidEnumValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }
    };
}

/// Administrative on/off switch for the lock as a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Active,
    Inactive,
}

text_enum!(OperationalStatus, "operational_status", {
    Active => "active",
    Inactive => "inactive",
});

/// Last-known reachability of the physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

text_enum!(Connectivity, "connectivity", {
    Online => "online",
    Offline => "offline",
});

impl Connectivity {
    /// Returns `true` if the device was reachable on the last probe.
    #[inline]
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// Physical relay state.
///
/// An energized relay holds the electromagnetic lock closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Locked,
    Unlocked,
}

text_enum!(PowerState, "power_state", {
    Locked => "locked",
    Unlocked => "unlocked",
});

impl PowerState {
    /// Map a relay instruction to the state it produces.
    #[inline]
    #[must_use]
    pub fn from_energized(energized: bool) -> Self {
        if energized {
            PowerState::Locked
        } else {
            PowerState::Unlocked
        }
    }

    /// Relay instruction that produces this state.
    #[inline]
    #[must_use]
    pub fn energized(self) -> bool {
        matches!(self, PowerState::Locked)
    }
}

/// Role of the caller, as reported by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular end user.
    Common,
    /// Platform administrator.
    Admin,
    /// Developer account, unrestricted like administrators.
    Developer,
    /// Shop operator owning one or more locks.
    Market,
}

text_enum!(Role, "role", {
    Common => "common",
    Admin => "admin",
    Developer => "developer",
    Market => "market",
});

impl Role {
    /// Returns `true` for roles that see every lock and event.
    #[inline]
    #[must_use]
    pub fn is_unrestricted(self) -> bool {
        matches!(self, Role::Admin | Role::Developer)
    }
}

/// Geographic position reported by the client at access time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
}

impl GeoPoint {
    /// Create a validated point.
    ///
    /// # Errors
    /// Returns `Error::InvalidCoordinates` if latitude is outside ±90 or
    /// longitude outside ±180.
    pub fn new(lat: f64, long: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
            return Err(Error::InvalidCoordinates { lat, long });
        }
        Ok(GeoPoint { lat, long })
    }
}

/// Validate a re-arm delay in milliseconds.
///
/// # Errors
/// Returns `Error::InvalidRearmDelay` for negative values.
pub fn validate_rearm_delay_ms(delay_ms: i64) -> Result<i64> {
    if delay_ms < MIN_REARM_DELAY_MS {
        return Err(Error::InvalidRearmDelay(delay_ms));
    }
    Ok(delay_ms)
}
