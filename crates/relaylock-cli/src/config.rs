//! Binary configuration read from the environment.
//!
//! | Variable             | Default          |
//! |----------------------|------------------|
//! | `DATABASE_PATH`      | `relaylock.db`   |
//! | `DEVICE_BACKEND`     | `simulated`      |
//! | `TUYA_BASE_URL`      | Tuya western America data center |
//! | `TUYA_ACCESS_ID`     | required for `tuya` |
//! | `TUYA_ACCESS_SECRET` | required for `tuya` |
//! | `DEVICE_TIMEOUT_MS`  | `5000`           |
//! | `REARM_MAX_ATTEMPTS` | `3`              |
//! | `REARM_BACKOFF_MS`   | `1000`           |

use relaylock_access::RearmPolicy;
use relaylock_core::constants::{
    DEFAULT_DEVICE_TIMEOUT_MS, DEFAULT_REARM_BACKOFF_MS, DEFAULT_REARM_MAX_ATTEMPTS,
};
use relaylock_device::{
    AnyDeviceCloud, DEFAULT_TUYA_BASE_URL, DeviceError, GatewayConfig, SimulatedCloud, TuyaCloud,
    TuyaConfig,
};
use relaylock_storage::{DEFAULT_DATABASE_PATH, DatabaseConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which vendor cloud drives the relays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBackend {
    Tuya,
    Simulated,
}

impl FromStr for DeviceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tuya" => Ok(Self::Tuya),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown backend '{other}', expected tuya or simulated")),
        }
    }
}

impl fmt::Display for DeviceBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Tuya => "tuya",
            Self::Simulated => "simulated",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub backend: DeviceBackend,
    pub tuya: Option<TuyaConfig>,
    pub device_timeout: Duration,
    pub rearm: RearmPolicy,
}

impl AppConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_path = get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.into());
        let backend = parse(&get, "DEVICE_BACKEND")?.unwrap_or(DeviceBackend::Simulated);
        let device_timeout = Duration::from_millis(
            parse(&get, "DEVICE_TIMEOUT_MS")?.unwrap_or(DEFAULT_DEVICE_TIMEOUT_MS),
        );

        let max_attempts: u32 =
            parse(&get, "REARM_MAX_ATTEMPTS")?.unwrap_or(DEFAULT_REARM_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "REARM_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        let backoff_ms: u64 = parse(&get, "REARM_BACKOFF_MS")?.unwrap_or(DEFAULT_REARM_BACKOFF_MS);

        let tuya = match backend {
            DeviceBackend::Tuya => {
                let access_id = get("TUYA_ACCESS_ID").ok_or(ConfigError::Missing {
                    key: "TUYA_ACCESS_ID",
                })?;
                let access_secret = get("TUYA_ACCESS_SECRET").ok_or(ConfigError::Missing {
                    key: "TUYA_ACCESS_SECRET",
                })?;
                let base_url = get("TUYA_BASE_URL").unwrap_or_else(|| DEFAULT_TUYA_BASE_URL.into());

                Some(
                    TuyaConfig::new(access_id, access_secret)
                        .with_base_url(base_url)
                        .with_request_timeout(device_timeout),
                )
            }
            DeviceBackend::Simulated => None,
        };

        Ok(Self {
            database_path,
            backend,
            tuya,
            device_timeout,
            rearm: RearmPolicy::default()
                .with_max_attempts(max_attempts)
                .with_backoff(Duration::from_millis(backoff_ms)),
        })
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_path.clone())
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig::default().with_timeout(self.device_timeout)
    }

    /// Instantiate the configured device cloud
    pub fn device_cloud(&self) -> Result<AnyDeviceCloud, DeviceError> {
        match (&self.backend, &self.tuya) {
            (DeviceBackend::Tuya, Some(tuya)) => Ok(TuyaCloud::new(tuya.clone())?.into()),
            _ => {
                let (cloud, _handle) = SimulatedCloud::new();
                Ok(cloud.into())
            }
        }
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
