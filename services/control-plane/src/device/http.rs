//! HTTP device gateway client.
//!
//! Talks to the site's device gateway, which relays start commands to the
//! physical units.

use std::time::Duration;

use async_trait::async_trait;
use suds_id::MachineId;
use tracing::{debug, error};

use super::{DeviceController, DeviceError};

/// Device gateway configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Base URL of the device gateway.
    pub gateway_url: String,

    /// Request timeout. Expiry is treated as command failure.
    pub timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:7070".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let gateway_url = std::env::var("SUDS_DEVICE_GATEWAY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7070".to_string());

        let timeout = std::env::var("SUDS_DEVICE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        Self {
            gateway_url,
            timeout,
        }
    }
}

/// Device controller that speaks HTTP to the gateway.
pub struct HttpDeviceController {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeviceController {
    /// Create a new gateway client.
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DeviceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DeviceController for HttpDeviceController {
    async fn start_cycle(&self, machine_id: MachineId) -> Result<(), DeviceError> {
        let url = format!("{}/machines/{}/start", self.base_url, machine_id);
        debug!(url = %url, "Issuing device start command");

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Device start command rejected");
            return Err(DeviceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(machine_id = %machine_id, "Device start command accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(base_url: &str) -> HttpDeviceController {
        HttpDeviceController::new(&DeviceConfig {
            gateway_url: base_url.to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn start_cycle_accepts_2xx() {
        let server = MockServer::start().await;
        let machine_id = MachineId::new();

        Mock::given(method("POST"))
            .and(path(format!("/machines/{machine_id}/start")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = controller(&server.uri()).start_cycle(machine_id).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn start_cycle_rejects_5xx() {
        let server = MockServer::start().await;
        let machine_id = MachineId::new();

        Mock::given(method("POST"))
            .and(path(format!("/machines/{machine_id}/start")))
            .respond_with(ResponseTemplate::new(503).set_body_string("drum jammed"))
            .mount(&server)
            .await;

        let result = controller(&server.uri()).start_cycle(machine_id).await;
        match result {
            Err(DeviceError::Rejected { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "drum jammed");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_transport_failure() {
        let server = MockServer::start().await;
        let machine_id = MachineId::new();

        Mock::given(method("POST"))
            .and(path(format!("/machines/{machine_id}/start")))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let slow = HttpDeviceController::new(&DeviceConfig {
            gateway_url: server.uri(),
            timeout: Duration::from_millis(100),
        })
        .unwrap();

        let result = slow.start_cycle(machine_id).await;
        assert!(matches!(result, Err(DeviceError::Transport(_))));
    }
}
