//! Tuya OpenAPI device cloud.
//!
//! Talks to the Tuya IoT cloud over HTTPS. Every call is signed with
//! HMAC-SHA256 using the project's access id and secret; business calls
//! additionally carry a cached access token.
//!
//! # Endpoints
//!
//! | Purpose | Call |
//! |---------|------|
//! | token   | `GET /v1.0/token?grant_type=1` |
//! | status  | `GET /v1.0/iot-03/devices/{device_id}` (`result.online`) |
//! | command | `POST /v1.0/iot-03/devices/{device_id}/commands` |
//!
//! # Signing
//!
//! ```text
//! string_to_sign = METHOD \n sha256_hex(body) \n \n path_with_query
//! sign = HEX_UPPER(HMAC_SHA256(secret, client_id [+ access_token] + t + nonce + string_to_sign))
//! ```

use crate::{
    DeviceError, Result,
    traits::DeviceCloud,
    types::{CommandAck, StatusPayload},
};
use hmac::{Hmac, Mac};
use relaylock_core::{DeviceId, constants::SWITCH_COMMAND_CODE};
use reqwest::Method;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Default Tuya data center (western America).
pub const DEFAULT_TUYA_BASE_URL: &str = "https://openapi.tuyaus.com";

/// Token refresh margin before the advertised expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Tuya error code for an expired or invalid access token.
const TOKEN_INVALID_CODE: i64 = 1010;

/// HTTP timeout for a single call. The gateway applies its own, usually
/// shorter, bound on top.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime Tuya issues tokens with, used when `expire_time` is absent.
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;

/// Tuya project credentials and endpoint.
#[derive(Clone)]
pub struct TuyaConfig {
    pub base_url: String,
    pub access_id: String,
    pub access_secret: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for TuyaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuyaConfig")
            .field("base_url", &self.base_url)
            .field("access_id", &self.access_id)
            .field("access_secret", &"****")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TuyaConfig {
    /// Create a configuration for the default data center.
    pub fn new(access_id: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_TUYA_BASE_URL.to_string(),
            access_id: access_id.into(),
            access_secret: access_secret.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Use another data center or a local test server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP timeout for a single call.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    /// Build a token from the `result` of a token response
    fn from_result(result: &Value) -> Result<Self> {
        let value = result
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| DeviceError::authentication("missing access_token"))?
            .to_string();
        let expire_secs = result
            .get("expire_time")
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        Ok(Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(expire_secs),
        })
    }

    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// Tuya OpenAPI client.
#[derive(Debug)]
pub struct TuyaCloud {
    client: reqwest::Client,
    config: TuyaConfig,
    token: Mutex<Option<AccessToken>>,
}

impl TuyaCloud {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Configuration` if credentials are empty or the
    /// HTTP client cannot be built.
    pub fn new(config: TuyaConfig) -> Result<Self> {
        if config.access_id.trim().is_empty() || config.access_secret.trim().is_empty() {
            return Err(DeviceError::configuration(
                "Tuya access id and secret are required",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeviceError::configuration(e.to_string()))?;

        info!(base_url = %config.base_url, "Tuya cloud client created");

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Return a valid access token, fetching a new one when needed.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let path = "/v1.0/token?grant_type=1";
        let t = timestamp_ms();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let prefix = format!("{}{}{}", self.config.access_id, t, nonce);
        let sign = sign(
            &self.config.access_secret,
            &prefix,
            &string_to_sign("GET", "", path),
        )?;

        debug!("Requesting Tuya access token");

        let response = self
            .client
            .get(format!("{}{}", self.config.base_url, path))
            .header("client_id", &self.config.access_id)
            .header("sign", sign)
            .header("t", t)
            .header("nonce", nonce)
            .header("sign_method", "HMAC-SHA256")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeviceError::authentication(format!(
                "token endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response.json().await?;
        let result = envelope_result(&body)
            .map_err(|e| DeviceError::authentication(e.to_string()))?;

        let token = AccessToken::from_result(result)?;

        info!(
            expire_secs = token.expires_at.saturating_duration_since(Instant::now()).as_secs(),
            "Tuya access token acquired"
        );

        Ok(token)
    }

    /// Perform a signed business call and return the decoded JSON body.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.access_token().await?;
        let body_text = body.map(Value::to_string).unwrap_or_default();
        let t = timestamp_ms();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let prefix = format!("{}{}{}{}", self.config.access_id, token, t, nonce);
        let sign = sign(
            &self.config.access_secret,
            &prefix,
            &string_to_sign(method.as_str(), &body_text, path),
        )?;

        let mut request = self
            .client
            .request(method, format!("{}{}", self.config.base_url, path))
            .header("client_id", &self.config.access_id)
            .header("access_token", &token)
            .header("sign", sign)
            .header("t", t)
            .header("nonce", nonce)
            .header("sign_method", "HMAC-SHA256");

        if body.is_some() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_text);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            return Err(DeviceError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        if body.get("code").and_then(Value::as_i64) == Some(TOKEN_INVALID_CODE) {
            warn!("Tuya access token rejected, dropping cached token");
            self.invalidate_token().await;
        }

        Ok(body)
    }
}

impl DeviceCloud for TuyaCloud {
    fn name(&self) -> &'static str {
        "tuya"
    }

    async fn fetch_status(&self, device: &DeviceId) -> Result<StatusPayload> {
        let path = format!("/v1.0/iot-03/devices/{}", device.as_str());
        let body = self.request(Method::GET, &path, None).await?;
        let online = envelope_result(&body)?
            .get("online")
            .and_then(Value::as_bool);

        Ok(StatusPayload { online, raw: body })
    }

    async fn send_switch(&self, device: &DeviceId, energize: bool) -> Result<CommandAck> {
        let path = format!("/v1.0/iot-03/devices/{}/commands", device.as_str());
        let payload = switch_payload(energize);
        let body = self.request(Method::POST, &path, Some(&payload)).await?;
        let success = body.get("success").and_then(Value::as_bool) == Some(true);

        Ok(CommandAck { success, raw: body })
    }
}

/// Body of a relay command.
pub fn switch_payload(energize: bool) -> Value {
    json!({
        "commands": [
            { "code": SWITCH_COMMAND_CODE, "value": energize }
        ]
    })
}

/// Canonical request string covered by the signature.
pub fn string_to_sign(method: &str, body: &str, path: &str) -> String {
    let content_hash = hex::encode(Sha256::digest(body.as_bytes()));
    format!("{method}\n{content_hash}\n\n{path}")
}

/// Compute the upper-case hex HMAC-SHA256 signature.
///
/// # Errors
///
/// Returns `DeviceError::Configuration` if the secret cannot key the MAC.
pub fn sign(secret: &str, prefix: &str, string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DeviceError::configuration(e.to_string()))?;
    mac.update(prefix.as_bytes());
    mac.update(string_to_sign.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

/// Extract `result` from a Tuya envelope, mapping `success: false` to an error.
fn envelope_result(body: &Value) -> Result<&Value> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        let code = body
            .get("code")
            .map(Value::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let msg = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return Err(DeviceError::rejected(code, msg));
    }

    body.get("result")
        .ok_or_else(|| DeviceError::invalid_response("missing result"))
}

fn timestamp_ms() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_string_to_sign_layout() {
        let s = string_to_sign("GET", "", "/v1.0/token?grant_type=1");
        assert_eq!(s, format!("GET\n{EMPTY_SHA256}\n\n/v1.0/token?grant_type=1"));
    }

    #[test]
    fn test_sign_known_vector() {
        let sts = string_to_sign("GET", "", "/v1.0/token?grant_type=1");
        let signature = sign("secret", "client-id1700000000000nonce-1", &sts).unwrap();
        assert_eq!(
            signature,
            "A009067EE1401F411B80F38E5BDAC6ABB6A4E7238868ED24A134A5398A1FC02C"
        );
    }

    #[test]
    fn test_switch_payload() {
        let payload = switch_payload(false);
        assert_eq!(payload["commands"][0]["code"], "switch_1");
        assert_eq!(payload["commands"][0]["value"], false);
    }

    #[test]
    fn test_envelope_rejected() {
        let body = json!({"success": false, "code": 1106, "msg": "permission deny"});
        let err = envelope_result(&body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Device cloud rejected request: 1106 permission deny"
        );
    }

    #[test]
    fn test_envelope_missing_result() {
        let body = json!({"success": true});
        assert!(matches!(
            envelope_result(&body),
            Err(DeviceError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_token_lifetime() {
        let token = AccessToken::from_result(&json!({"access_token": "t1", "expire_time": 3600}))
            .unwrap();
        assert_eq!(token.value, "t1");
        assert!(token.is_fresh());
        assert!(token.expires_at <= Instant::now() + Duration::from_secs(3600));

        // Missing or zero lifetime falls back to the issued default
        let floor = Instant::now() + Duration::from_secs(DEFAULT_TOKEN_TTL_SECS - 60);
        for result in [
            json!({"access_token": "t2"}),
            json!({"access_token": "t3", "expire_time": 0}),
        ] {
            let token = AccessToken::from_result(&result).unwrap();
            assert!(token.is_fresh());
            assert!(token.expires_at > floor);
        }

        assert!(matches!(
            AccessToken::from_result(&json!({"expire_time": 7200})),
            Err(DeviceError::Authentication { .. })
        ));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let err = TuyaCloud::new(TuyaConfig::new("", "secret")).unwrap_err();
        assert!(matches!(err, DeviceError::Configuration { .. }));
    }

    #[test]
    fn test_config_debug_hides_secret() {
        let config = TuyaConfig::new("id", "super-secret").with_base_url("http://127.0.0.1:9/");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert_eq!(config.base_url, "http://127.0.0.1:9");
    }
}
