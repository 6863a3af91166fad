//! In-process device cloud for development and testing.
//!
//! [`SimulatedCloud`] behaves like a vendor cloud fronting a set of smart
//! plugs. A paired [`SimulatedCloudHandle`] scripts its behavior: device
//! reachability, latency, injected failures, and it records every command
//! received.
//!
//! # Examples
//!
//! ```
//! use relaylock_core::DeviceId;
//! use relaylock_device::{DeviceGateway, SimulatedCloud};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (cloud, handle) = SimulatedCloud::new();
//!     let gateway = DeviceGateway::new(cloud);
//!     let device = DeviceId::new("bf0123456789abcdef").unwrap();
//!
//!     let report = gateway.dispatch(&device, false).await;
//!     assert!(report.success);
//!     assert_eq!(handle.relay_state(&device), Some(false));
//! }
//! ```

use crate::{
    DeviceError, Result,
    traits::DeviceCloud,
    types::{CommandAck, StatusPayload},
};
use chrono::{DateTime, Utc};
use relaylock_core::{DeviceId, constants::SWITCH_COMMAND_CODE};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A command received by the simulated cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub device_id: DeviceId,
    pub energize: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SimState {
    online: bool,
    device_online: HashMap<DeviceId, bool>,
    latency: Duration,
    fail_status: bool,
    fail_commands: u32,
    reject_commands: u32,
    relays: HashMap<DeviceId, bool>,
    commands: Vec<RecordedCommand>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            online: true,
            device_online: HashMap::new(),
            latency: Duration::ZERO,
            fail_status: false,
            fail_commands: 0,
            reject_commands: 0,
            relays: HashMap::new(),
            commands: Vec::new(),
        }
    }
}

impl SimState {
    fn is_online(&self, device: &DeviceId) -> bool {
        self.device_online
            .get(device)
            .copied()
            .unwrap_or(self.online)
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated vendor cloud.
#[derive(Debug, Clone)]
pub struct SimulatedCloud {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCloud {
    /// Create a simulated cloud where every device is online.
    ///
    /// Returns the cloud and a handle that controls it.
    pub fn new() -> (Self, SimulatedCloudHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedCloudHandle { state },
        )
    }

    async fn simulate_latency(&self) {
        let latency = lock_state(&self.state).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl DeviceCloud for SimulatedCloud {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn fetch_status(&self, device: &DeviceId) -> Result<StatusPayload> {
        self.simulate_latency().await;

        let state = lock_state(&self.state);
        if state.fail_status {
            return Err(DeviceError::injected("status endpoint unavailable"));
        }

        let online = state.is_online(device);
        Ok(StatusPayload {
            online: Some(online),
            raw: json!({
                "success": true,
                "result": {
                    "id": device.as_str(),
                    "online": online,
                    "status": [{
                        "code": SWITCH_COMMAND_CODE,
                        "value": state.relays.get(device).copied().unwrap_or(true),
                    }],
                },
            }),
        })
    }

    async fn send_switch(&self, device: &DeviceId, energize: bool) -> Result<CommandAck> {
        self.simulate_latency().await;

        let mut state = lock_state(&self.state);
        state.commands.push(RecordedCommand {
            device_id: device.clone(),
            energize,
            received_at: Utc::now(),
        });

        if state.fail_commands > 0 {
            state.fail_commands -= 1;
            return Err(DeviceError::injected("command transport failure"));
        }

        if state.reject_commands > 0 {
            state.reject_commands -= 1;
            return Ok(CommandAck {
                success: false,
                raw: json!({"success": false, "code": 2008, "msg": "command or value not support"}),
            });
        }

        state.relays.insert(device.clone(), energize);
        Ok(CommandAck {
            success: true,
            raw: json!({"success": true, "result": true}),
        })
    }
}

/// Control handle for a [`SimulatedCloud`].
#[derive(Debug, Clone)]
pub struct SimulatedCloudHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCloudHandle {
    /// Set reachability for every device without an override.
    pub fn set_online(&self, online: bool) {
        lock_state(&self.state).online = online;
    }

    /// Override reachability for one device.
    pub fn set_device_online(&self, device: &DeviceId, online: bool) {
        lock_state(&self.state)
            .device_online
            .insert(device.clone(), online);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        lock_state(&self.state).latency = latency;
    }

    /// Make status calls fail with a transport-like error.
    pub fn fail_status(&self, fail: bool) {
        lock_state(&self.state).fail_status = fail;
    }

    /// Make the next `count` commands fail before an acknowledgement.
    pub fn fail_next_commands(&self, count: u32) {
        lock_state(&self.state).fail_commands = count;
    }

    /// Make the next `count` commands return `success: false`.
    pub fn reject_next_commands(&self, count: u32) {
        lock_state(&self.state).reject_commands = count;
    }

    /// Every command received so far, oldest first.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock_state(&self.state).commands.clone()
    }

    /// Commands received for one device.
    pub fn commands_for(&self, device: &DeviceId) -> Vec<RecordedCommand> {
        lock_state(&self.state)
            .commands
            .iter()
            .filter(|c| &c.device_id == device)
            .cloned()
            .collect()
    }

    /// Last acknowledged relay instruction for a device.
    pub fn relay_state(&self, device: &DeviceId) -> Option<bool> {
        lock_state(&self.state).relays.get(device).copied()
    }
}
