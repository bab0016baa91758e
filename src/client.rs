//! Remote device API boundary.
//!
//! The backend bridge owns the actual Modbus TCP session; this module only
//! models its request/response HTTP/JSON surface. [`DeviceClient`] is the
//! seam the engine talks through, [`HttpDeviceClient`] is the production
//! implementation; tests substitute scripted clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RemoteError;
use crate::session::Endpoint;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Remote view of connectivity, from the bridge's `/api/status` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub connected: bool,
    pub ip: Option<String>,
}

/// Opaque request/response boundary to the backend device API.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> RemoteResult<()>;
    async fn disconnect(&self) -> RemoteResult<()>;
    async fn status(&self) -> RemoteResult<DeviceStatus>;
    async fn read_registers(&self, start_address: u16, count: u16) -> RemoteResult<Vec<u16>>;
    async fn write_register(&self, address: u16, value: u16) -> RemoteResult<()>;
    async fn read_coils(&self, start_address: u16, count: u16) -> RemoteResult<Vec<bool>>;
    async fn write_coil(&self, address: u16, value: bool) -> RemoteResult<()>;
    async fn emergency_stop(&self) -> RemoteResult<()>;
}

// ============================================================================
// Wire shapes (field names match the bridge API exactly)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct ConnectRequest<'a> {
    ip: &'a str,
    port: u16,
    unit_id: u8,
    timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DisconnectResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ReadRegistersRequest {
    start_address: u16,
    count: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct ReadRegistersResponse {
    success: bool,
    #[serde(default)]
    registers: Option<Vec<u16>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WriteRegisterRequest {
    address: u16,
    value: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct WriteRegisterResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ReadCoilsRequest {
    start_address: u16,
    count: u16,
}

/// Coil routes use a `status`/`message` envelope and 0/1 coil values,
/// unlike the register routes' `success`/`error` shape.
#[derive(Debug, Clone, Deserialize)]
struct ReadCoilsResponse {
    status: String,
    #[serde(default)]
    coils: Option<Vec<u8>>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WriteCoilRequest {
    address: u16,
    value: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct WriteCoilResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmergencyStopResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// HTTP/JSON client for the device bridge.
pub struct HttpDeviceClient {
    client: reqwest::Client,
    base_url: String,
    /// Per-request timeout; refreshed from the endpoint at connect time.
    timeout_ms: AtomicU64,
}

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

impl HttpDeviceClient {
    pub fn new(base_url: impl Into<String>) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RemoteError::unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT_MS),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// The bridge reports failures through JSON envelopes on non-2xx
    /// responses too, so the body is parsed regardless of the status code.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> RemoteResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {}", self.url(path));
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout())
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        response.json().await.map_err(map_reqwest_error)
    }

    async fn get_json<T>(&self, path: &str) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        debug!("GET {}", self.url(path));
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        response.json().await.map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::timeout(err.to_string())
    } else if err.is_connect() {
        RemoteError::unreachable(err.to_string())
    } else {
        RemoteError::rejected(err.to_string())
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn connect(&self, endpoint: &Endpoint) -> RemoteResult<()> {
        self.timeout_ms.store(endpoint.timeout_ms, Ordering::Relaxed);
        let request = ConnectRequest {
            ip: &endpoint.ip,
            port: endpoint.port,
            unit_id: endpoint.unit_id,
            timeout_ms: endpoint.timeout_ms,
        };
        let response: ConnectResponse = self.post_json("connect", &request).await?;
        if response.status == "connected" {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                response.error.unwrap_or_else(|| "connection refused by device".to_string()),
            ))
        }
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        let response: DisconnectResponse =
            self.post_json("disconnect", &serde_json::json!({})).await?;
        if response.status == "disconnected" {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                response.error.unwrap_or_else(|| "disconnect refused by device".to_string()),
            ))
        }
    }

    async fn status(&self) -> RemoteResult<DeviceStatus> {
        let response: StatusResponse = self.get_json("status").await?;
        Ok(DeviceStatus {
            connected: response.status == "connected",
            ip: response.ip,
        })
    }

    async fn read_registers(&self, start_address: u16, count: u16) -> RemoteResult<Vec<u16>> {
        let request = ReadRegistersRequest {
            start_address,
            count,
        };
        let response: ReadRegistersResponse = self.post_json("read_registers", &request).await?;
        if response.success {
            Ok(response.registers.unwrap_or_default())
        } else {
            Err(RemoteError::rejected(
                response.error.unwrap_or_else(|| "register read failed".to_string()),
            ))
        }
    }

    async fn write_register(&self, address: u16, value: u16) -> RemoteResult<()> {
        let request = WriteRegisterRequest { address, value };
        let response: WriteRegisterResponse = self.post_json("write_register", &request).await?;
        if response.success {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                response.error.unwrap_or_else(|| "register write failed".to_string()),
            ))
        }
    }

    async fn read_coils(&self, start_address: u16, count: u16) -> RemoteResult<Vec<bool>> {
        let request = ReadCoilsRequest {
            start_address,
            count,
        };
        let response: ReadCoilsResponse = self.post_json("read_coils", &request).await?;
        if response.status == "success" {
            Ok(response
                .coils
                .unwrap_or_default()
                .into_iter()
                .map(|c| c != 0)
                .collect())
        } else {
            Err(RemoteError::rejected(
                response.message.unwrap_or_else(|| "coil read failed".to_string()),
            ))
        }
    }

    async fn write_coil(&self, address: u16, value: bool) -> RemoteResult<()> {
        let request = WriteCoilRequest {
            address,
            value: u8::from(value),
        };
        let response: WriteCoilResponse = self.post_json("write_coil", &request).await?;
        if response.status == "success" {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                response.message.unwrap_or_else(|| "coil write failed".to_string()),
            ))
        }
    }

    async fn emergency_stop(&self) -> RemoteResult<()> {
        let response: EmergencyStopResponse =
            self.post_json("emergency_stop", &serde_json::json!({})).await?;
        if response.success {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                response.error.unwrap_or_else(|| "emergency stop failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_envelopes() {
        let ok: ConnectResponse =
            serde_json::from_str(r#"{"status": "connected", "clp_ip": "10.0.0.2", "unit_id": 1}"#)
                .unwrap();
        assert_eq!(ok.status, "connected");
        assert!(ok.error.is_none());

        let err: ConnectResponse = serde_json::from_str(
            r#"{"status": "disconnected", "error": "Connection failure to device"}"#,
        )
        .unwrap();
        assert_eq!(err.status, "disconnected");
        assert_eq!(err.error.as_deref(), Some("Connection failure to device"));
    }

    #[test]
    fn parses_register_read_envelope() {
        let response: ReadRegistersResponse = serde_json::from_str(
            r#"{"success": true, "registers": [0, 1234, 7], "start_address": 0, "count": 3, "unit_id": 1}"#,
        )
        .unwrap();
        assert!(response.success);
        assert_eq!(response.registers.unwrap(), vec![0, 1234, 7]);
    }

    #[test]
    fn parses_coil_read_envelope_with_numeric_states() {
        let response: ReadCoilsResponse = serde_json::from_str(
            r#"{"status": "success", "coils": [1, 0, 1], "message": "3 coils read"}"#,
        )
        .unwrap();
        assert_eq!(response.status, "success");
        let states: Vec<bool> = response.coils.unwrap().into_iter().map(|c| c != 0).collect();
        assert_eq!(states, vec![true, false, true]);
    }

    #[test]
    fn request_bodies_use_bridge_field_names() {
        let body = serde_json::to_value(ReadCoilsRequest {
            start_address: 100,
            count: 3,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"start_address": 100, "count": 3}));

        let body = serde_json::to_value(WriteCoilRequest {
            address: 101,
            value: 1,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"address": 101, "value": 1}));
    }
}
