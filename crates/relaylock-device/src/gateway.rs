//! Device gateway: the only way the access pipeline talks to a lock.
//!
//! # Architecture
//!
//! ```text
//! AccessOrchestrator ─┐
//!                     ├─> DeviceGateway ──> DeviceCloud (Tuya | Simulated)
//! ReArmScheduler ─────┘        │
//!                              ├─ timeout per call
//!                              ├─ probe before every dispatch
//!                              └─ errors folded into fail-safe reports
//! ```
//!
//! # Fail-safe rules
//!
//! - A probe that errors, times out or lacks a positive online indicator
//!   reports `online = false`.
//! - A dispatch always probes first. An offline device never receives a
//!   command.
//! - A dispatch that errors or times out reports `success = false`.
//!
//! The gateway performs no retries. Retrying is the caller's decision.

use crate::{
    DeviceError,
    traits::DeviceCloud,
    types::{DispatchReport, ProbeReport},
};
use relaylock_core::{DeviceId, constants::DEFAULT_DEVICE_TIMEOUT_MS};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gateway configuration.
///
/// # Example
///
/// ```
/// use relaylock_device::GatewayConfig;
/// use std::time::Duration;
///
/// let config = GatewayConfig::default().with_timeout(Duration::from_secs(2));
/// assert_eq!(config.timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Upper bound for each probe or command call.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_DEVICE_TIMEOUT_MS),
        }
    }
}

impl GatewayConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Timeout-bounded, fail-safe facade over a [`DeviceCloud`].
#[derive(Debug)]
pub struct DeviceGateway<C> {
    cloud: C,
    config: GatewayConfig,
}

impl<C: DeviceCloud> DeviceGateway<C> {
    /// Create a gateway with the default configuration.
    pub fn new(cloud: C) -> Self {
        Self::with_config(cloud, GatewayConfig::default())
    }

    /// Create a gateway with a custom configuration.
    pub fn with_config(cloud: C, config: GatewayConfig) -> Self {
        debug!(
            backend = cloud.name(),
            timeout_ms = config.timeout.as_millis() as u64,
            "Creating device gateway"
        );
        Self { cloud, config }
    }

    /// Access the underlying cloud backend.
    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Current configuration.
    pub fn config(&self) -> GatewayConfig {
        self.config
    }

    /// Query device connectivity.
    ///
    /// Never fails: anything short of a confirmed online status is reported
    /// as offline.
    pub async fn probe(&self, device: &DeviceId) -> ProbeReport {
        let timeout_ms = self.config.timeout.as_millis() as u64;

        let status = match tokio::time::timeout(self.config.timeout, self.cloud.fetch_status(device))
            .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(device_id = %device, error = %e, "Status probe failed, treating as offline");
                return ProbeReport::offline();
            }
            Err(_) => {
                warn!(
                    device_id = %device,
                    error = %DeviceError::timeout(timeout_ms),
                    "Status probe timed out, treating as offline"
                );
                return ProbeReport::offline();
            }
        };

        let online = status.is_online();
        debug!(device_id = %device, online, "Status probe completed");

        ProbeReport {
            online,
            raw: Some(status.raw),
        }
    }

    /// Probe the device, then send one relay instruction if it is reachable.
    ///
    /// `energize = true` locks, `false` unlocks.
    pub async fn dispatch(&self, device: &DeviceId, energize: bool) -> DispatchReport {
        let probe = self.probe(device).await;
        if !probe.online {
            warn!(device_id = %device, energize, "Device offline, command not sent");
            return DispatchReport::unreachable();
        }

        let timeout_ms = self.config.timeout.as_millis() as u64;

        match tokio::time::timeout(self.config.timeout, self.cloud.send_switch(device, energize))
            .await
        {
            Ok(Ok(ack)) if ack.success => {
                info!(device_id = %device, energize, "Relay command acknowledged");
                DispatchReport {
                    success: true,
                    reachable: true,
                    raw: Some(ack.raw),
                }
            }
            Ok(Ok(ack)) => {
                warn!(device_id = %device, energize, "Relay command not acknowledged");
                DispatchReport::failed(Some(ack.raw))
            }
            Ok(Err(e)) => {
                warn!(device_id = %device, energize, error = %e, "Relay command failed");
                DispatchReport::failed(None)
            }
            Err(_) => {
                warn!(
                    device_id = %device,
                    energize,
                    error = %DeviceError::timeout(timeout_ms),
                    "Relay command timed out"
                );
                DispatchReport::failed(None)
            }
        }
    }
}
