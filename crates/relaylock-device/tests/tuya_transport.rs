//! Integration tests for the Tuya backend behind the gateway.
//!
//! A small HTTP server on a local `TcpListener` stands in for the Tuya cloud.
//! Every connection serves one request and closes, which keeps the parser
//! trivial.

use relaylock_core::DeviceId;
use relaylock_device::{DeviceGateway, GatewayConfig, TuyaCloud, TuyaConfig};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Debug, Clone, Copy)]
struct CloudBehavior {
    online: bool,
    command_success: bool,
}

type Log = Arc<Mutex<Vec<RecordedRequest>>>;

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn response_for(request: &RecordedRequest, behavior: CloudBehavior) -> Value {
    if request.path.starts_with("/v1.0/token") {
        return json!({
            "success": true,
            "result": {"access_token": "test-token", "expire_time": 7200, "uid": "u1"},
        });
    }
    if request.method == "POST" && request.path.ends_with("/commands") {
        return json!({"success": behavior.command_success, "result": behavior.command_success});
    }
    json!({
        "success": true,
        "result": {"id": "bf0123456789abcdef", "online": behavior.online},
    })
}

async fn start_cloud(behavior: CloudBehavior) -> (SocketAddr, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let server_log = Arc::clone(&log);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let log = Arc::clone(&server_log);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let body = response_for(&request, behavior).to_string();
                log.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, log)
}

fn gateway_for(addr: SocketAddr, timeout: Duration) -> DeviceGateway<TuyaCloud> {
    let config = TuyaConfig::new("test-access-id", "test-secret")
        .with_base_url(format!("http://{addr}"))
        .with_request_timeout(Duration::from_secs(5));
    let cloud = TuyaCloud::new(config).unwrap();
    DeviceGateway::with_config(cloud, GatewayConfig::default().with_timeout(timeout))
}

fn device() -> DeviceId {
    DeviceId::new("bf0123456789abcdef").unwrap()
}

#[tokio::test]
async fn test_probe_signs_requests_and_caches_token() {
    let (addr, log) = start_cloud(CloudBehavior {
        online: true,
        command_success: true,
    })
    .await;
    let gateway = gateway_for(addr, Duration::from_secs(2));

    assert!(gateway.probe(&device()).await.online);
    assert!(gateway.probe(&device()).await.online);

    let requests = log.lock().unwrap().clone();
    let token_calls = requests
        .iter()
        .filter(|r| r.path.starts_with("/v1.0/token"))
        .count();
    assert_eq!(token_calls, 1, "token must be cached between calls");

    let status = requests
        .iter()
        .find(|r| r.path == "/v1.0/iot-03/devices/bf0123456789abcdef")
        .expect("status call");
    assert_eq!(status.method, "GET");
    assert_eq!(status.headers.get("client_id").unwrap(), "test-access-id");
    assert_eq!(status.headers.get("access_token").unwrap(), "test-token");
    assert_eq!(status.headers.get("sign_method").unwrap(), "HMAC-SHA256");
    let sign = status.headers.get("sign").unwrap();
    assert_eq!(sign.len(), 64);
    assert!(sign.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
}

#[tokio::test]
async fn test_dispatch_sends_switch_command() {
    let (addr, log) = start_cloud(CloudBehavior {
        online: true,
        command_success: true,
    })
    .await;
    let gateway = gateway_for(addr, Duration::from_secs(2));

    let report = gateway.dispatch(&device(), false).await;
    assert!(report.success);
    assert!(report.reachable);

    let requests = log.lock().unwrap().clone();
    let command = requests
        .iter()
        .find(|r| r.method == "POST")
        .expect("command call");
    assert_eq!(command.path, "/v1.0/iot-03/devices/bf0123456789abcdef/commands");

    let body: Value = serde_json::from_str(&command.body).unwrap();
    assert_eq!(body["commands"][0]["code"], "switch_1");
    assert_eq!(body["commands"][0]["value"], false);
}

#[tokio::test]
async fn test_offline_device_receives_no_command() {
    let (addr, log) = start_cloud(CloudBehavior {
        online: false,
        command_success: true,
    })
    .await;
    let gateway = gateway_for(addr, Duration::from_secs(2));

    let report = gateway.dispatch(&device(), true).await;
    assert!(report.is_offline());

    let requests = log.lock().unwrap().clone();
    assert!(requests.iter().all(|r| r.method != "POST"));
}

#[tokio::test]
async fn test_unacknowledged_command_is_failure() {
    let (addr, _log) = start_cloud(CloudBehavior {
        online: true,
        command_success: false,
    })
    .await;
    let gateway = gateway_for(addr, Duration::from_secs(2));

    let report = gateway.dispatch(&device(), true).await;
    assert!(report.reachable);
    assert!(!report.success);
    assert!(report.raw.is_some());
}

#[tokio::test]
async fn test_silent_server_times_out_as_offline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept connections and hold them open without answering.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let gateway = gateway_for(addr, Duration::from_millis(200));

    let started = Instant::now();
    let report = gateway.probe(&device()).await;
    assert!(!report.online);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_connection_refused_is_offline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = gateway_for(addr, Duration::from_secs(1));

    let report = gateway.dispatch(&device(), false).await;
    assert!(report.is_offline());
    assert!(!report.success);
}
