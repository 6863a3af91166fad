//! Payloads exchanged with device clouds and the reports the gateway returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw status answer from a device cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Online indicator, if the cloud reported one.
    pub online: Option<bool>,

    /// Vendor payload, kept verbatim for diagnostics.
    pub raw: Value,
}

impl StatusPayload {
    /// Returns `true` only for an explicit positive online indicator.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online == Some(true)
    }
}

/// Raw acknowledgement of a relay command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Vendor success flag.
    pub success: bool,

    /// Vendor payload, kept verbatim for diagnostics.
    pub raw: Value,
}

/// Result of a connectivity probe.
///
/// Transport errors, timeouts and malformed payloads all produce
/// `online == false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub online: bool,
    pub raw: Option<Value>,
}

impl ProbeReport {
    /// Probe that could not confirm reachability.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            online: false,
            raw: None,
        }
    }
}

/// Result of a relay dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Cloud acknowledged the command.
    pub success: bool,

    /// Pre-dispatch probe found the device online.
    ///
    /// When `false` no command was sent.
    pub reachable: bool,

    /// Vendor payload of the command call, when one was made.
    pub raw: Option<Value>,
}

impl DispatchReport {
    /// Dispatch skipped because the device was unreachable.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            success: false,
            reachable: false,
            raw: None,
        }
    }

    /// Command sent to a reachable device but not acknowledged.
    #[must_use]
    pub fn failed(raw: Option<Value>) -> Self {
        Self {
            success: false,
            reachable: true,
            raw,
        }
    }

    /// Returns `true` when the command was skipped for lack of connectivity.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        !self.reachable
    }
}
