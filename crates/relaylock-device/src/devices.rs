//! Enum wrapper for device cloud dispatch.
//!
//! [`DeviceCloud`] methods return `impl Future`, so the trait cannot be used
//! as `dyn DeviceCloud`. [`AnyDeviceCloud`] lets the binary pick a backend at
//! runtime while the gateway stays monomorphic.
//!
//! # Examples
//!
//! ```
//! use relaylock_device::{AnyDeviceCloud, DeviceGateway, SimulatedCloud};
//!
//! let (cloud, _handle) = SimulatedCloud::new();
//! let gateway = DeviceGateway::new(AnyDeviceCloud::Simulated(cloud));
//! ```

use crate::{
    Result,
    simulated::SimulatedCloud,
    traits::DeviceCloud,
    tuya::TuyaCloud,
    types::{CommandAck, StatusPayload},
};
use relaylock_core::DeviceId;

/// Runtime-selected device cloud.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDeviceCloud {
    /// Tuya OpenAPI.
    Tuya(TuyaCloud),
    /// In-process simulation.
    Simulated(SimulatedCloud),
}

impl DeviceCloud for AnyDeviceCloud {
    fn name(&self) -> &'static str {
        match self {
            Self::Tuya(cloud) => cloud.name(),
            Self::Simulated(cloud) => cloud.name(),
        }
    }

    async fn fetch_status(&self, device: &DeviceId) -> Result<StatusPayload> {
        match self {
            Self::Tuya(cloud) => cloud.fetch_status(device).await,
            Self::Simulated(cloud) => cloud.fetch_status(device).await,
        }
    }

    async fn send_switch(&self, device: &DeviceId, energize: bool) -> Result<CommandAck> {
        match self {
            Self::Tuya(cloud) => cloud.send_switch(device, energize).await,
            Self::Simulated(cloud) => cloud.send_switch(device, energize).await,
        }
    }
}

impl From<TuyaCloud> for AnyDeviceCloud {
    fn from(cloud: TuyaCloud) -> Self {
        Self::Tuya(cloud)
    }
}

impl From<SimulatedCloud> for AnyDeviceCloud {
    fn from(cloud: SimulatedCloud) -> Self {
        Self::Simulated(cloud)
    }
}
