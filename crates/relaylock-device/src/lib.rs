//! Device access layer for relay locks.
//!
//! Each lock is a smart plug gating power to an electromagnetic latch. The
//! plug is reached through a vendor cloud. This crate provides:
//!
//! - [`DeviceCloud`]: the vendor-facing trait (status + relay switch).
//! - [`TuyaCloud`]: the Tuya OpenAPI backend.
//! - [`SimulatedCloud`]: an in-process backend for development and tests.
//! - [`AnyDeviceCloud`]: enum dispatch for runtime backend selection.
//! - [`DeviceGateway`]: timeout-bounded probe and dispatch with fail-safe
//!   semantics, used by the access pipeline.
//!
//! # Example
//!
//! ```no_run
//! use relaylock_core::DeviceId;
//! use relaylock_device::{DeviceGateway, GatewayConfig, TuyaCloud, TuyaConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> relaylock_device::Result<()> {
//! let cloud = TuyaCloud::new(TuyaConfig::new("access-id", "access-secret"))?;
//! let gateway = DeviceGateway::with_config(
//!     cloud,
//!     GatewayConfig::default().with_timeout(Duration::from_secs(5)),
//! );
//!
//! let device = DeviceId::new("bf0123456789abcdef").expect("valid id");
//! let report = gateway.dispatch(&device, false).await;
//! if report.is_offline() {
//!     println!("device offline");
//! }
//! # Ok(())
//! # }
//! ```

pub mod devices;
pub mod error;
pub mod gateway;
pub mod simulated;
pub mod traits;
pub mod tuya;
pub mod types;

pub use devices::AnyDeviceCloud;
pub use error::{DeviceError, Result};
pub use gateway::{DeviceGateway, GatewayConfig};
pub use simulated::{RecordedCommand, SimulatedCloud, SimulatedCloudHandle};
pub use traits::DeviceCloud;
pub use tuya::{DEFAULT_TUYA_BASE_URL, TuyaCloud, TuyaConfig};
pub use types::{CommandAck, DispatchReport, ProbeReport, StatusPayload};
