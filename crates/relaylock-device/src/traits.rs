//! Device cloud trait.
//!
//! A device cloud is the vendor service that relays commands to the smart
//! plugs driving each lock. Implementations only translate calls into the
//! vendor's API: timeouts, probe-before-dispatch and fail-safe mapping are
//! the job of [`DeviceGateway`](crate::gateway::DeviceGateway).
//!
//! Methods return `impl Future + Send` so gateways built on any cloud can be
//! driven from spawned Tokio tasks (the re-arm scheduler does this).
//! Implementations may still use plain `async fn`.
//!
//! **NOTE**: This trait is NOT object-safe. Use
//! [`AnyDeviceCloud`](crate::devices::AnyDeviceCloud) for runtime selection.

use crate::{
    Result,
    types::{CommandAck, StatusPayload},
};
use relaylock_core::DeviceId;
use std::future::Future;

/// Vendor cloud able to report device status and switch relays.
pub trait DeviceCloud: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch the current status of a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the cloud could not be reached or its answer
    /// could not be parsed.
    fn fetch_status(&self, device: &DeviceId) -> impl Future<Output = Result<StatusPayload>> + Send;

    /// Send a single relay instruction (`true` energizes the lock).
    ///
    /// # Errors
    ///
    /// Returns an error if the call failed before an acknowledgement was
    /// received.
    fn send_switch(
        &self,
        device: &DeviceId,
        energize: bool,
    ) -> impl Future<Output = Result<CommandAck>> + Send;
}
