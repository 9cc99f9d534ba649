//! Client for the remote command exchange service.
//!
//! The service turns device telemetry into a hex command blob. Its logic is
//! opaque; only the request/response contract lives here.

use crate::domain::error::ExchangeError;
use crate::domain::models::{CommandBlob, TelemetryRecord};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// The three calls the control workflow makes against the service.
#[async_trait]
pub trait CommandExchange: Send + Sync {
    /// Restore command for the telemetry just read from the device.
    async fn command_for_telemetry(
        &self,
        device_name: &str,
        telemetry: &TelemetryRecord,
    ) -> Result<CommandBlob, ExchangeError>;

    /// First-time initialization command, keyed by name only.
    async fn initialization_command(&self, device_name: &str) -> Result<CommandBlob, ExchangeError>;

    /// Report the firmware version seen in a notification.
    async fn upload_device_info(&self, device_name: &str, info: &str) -> Result<(), ExchangeError>;
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    data: &'a [String],
    name: &'a str,
    info: &'a str,
}

#[derive(Serialize)]
struct DeviceInfoRequest<'a> {
    name: &'a str,
    info: &'a str,
}

/// HTTPS implementation of [`CommandExchange`].
#[derive(Debug, Clone)]
pub struct HttpExchange {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpExchange {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Use a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), name)
    }
}

async fn command_from_response(response: reqwest::Response) -> Result<CommandBlob, ExchangeError> {
    match response.status() {
        StatusCode::OK => {
            let body = response.text().await?;
            let command = body.trim();
            if command.is_empty() {
                return Err(ExchangeError::EmptyCommand);
            }
            debug!("Received {} hex chars of command data", command.len());
            Ok(CommandBlob::new(command))
        }
        StatusCode::FORBIDDEN => Err(ExchangeError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Err(ExchangeError::RateLimited),
        other => {
            warn!("Exchange service answered {}", other);
            Err(ExchangeError::Status(other.as_u16()))
        }
    }
}

#[async_trait]
impl CommandExchange for HttpExchange {
    async fn command_for_telemetry(
        &self,
        device_name: &str,
        telemetry: &TelemetryRecord,
    ) -> Result<CommandBlob, ExchangeError> {
        let body = CommandRequest {
            data: telemetry.fields(),
            name: device_name,
            info: telemetry.raw(),
        };
        let response = self
            .http
            .post(self.endpoint("apigetdata"))
            .json(&body)
            .send()
            .await?;
        command_from_response(response).await
    }

    async fn initialization_command(&self, device_name: &str) -> Result<CommandBlob, ExchangeError> {
        let response = self
            .http
            .get(self.endpoint("apiinitdata"))
            .query(&[("name", device_name)])
            .send()
            .await?;
        command_from_response(response).await
    }

    async fn upload_device_info(&self, device_name: &str, info: &str) -> Result<(), ExchangeError> {
        let body = DeviceInfoRequest {
            name: device_name,
            info,
        };
        let response = self
            .http
            .post(self.endpoint("apideviceinfo"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ExchangeError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::decode_telemetry;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TELEMETRY: &str =
        "N:PWR-7734,D:20240101,T:120000,EQ:12.5,P:0,V:220.1,I:0,PF:1,A1:0,A2:0,A3:0,A4:0,KS:1";

    async fn setup() -> (MockServer, HttpExchange) {
        let server = MockServer::start().await;
        let base_url = Url::parse(&server.uri()).unwrap();
        let exchange = HttpExchange::new(base_url, Duration::from_secs(5)).unwrap();
        (server, exchange)
    }

    #[tokio::test]
    async fn test_command_for_telemetry_posts_fields_and_raw_text() {
        let (server, exchange) = setup().await;
        let telemetry = decode_telemetry(TELEMETRY).unwrap();

        Mock::given(method("POST"))
            .and(path("/apigetdata"))
            .and(body_json(json!({
                "data": telemetry.fields(),
                "name": "PWR-7734",
                "info": TELEMETRY,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("1A2B3C\n"))
            .expect(1)
            .mount(&server)
            .await;

        let command = exchange
            .command_for_telemetry("PWR-7734", &telemetry)
            .await
            .unwrap();
        assert_eq!(command.as_str(), "1A2B3C");
    }

    #[tokio::test]
    async fn test_status_codes_map_to_distinct_errors() {
        let (server, exchange) = setup().await;
        let telemetry = decode_telemetry(TELEMETRY).unwrap();

        Mock::given(method("POST"))
            .and(path("/apigetdata"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/apiinitdata"))
            .and(query_param("name", "LIMITED"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/apiinitdata"))
            .and(query_param("name", "BROKEN"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(matches!(
            exchange.command_for_telemetry("PWR-7734", &telemetry).await,
            Err(ExchangeError::Unauthorized)
        ));
        assert!(matches!(
            exchange.initialization_command("LIMITED").await,
            Err(ExchangeError::RateLimited)
        ));
        assert!(matches!(
            exchange.initialization_command("BROKEN").await,
            Err(ExchangeError::Status(500))
        ));
    }

    #[tokio::test]
    async fn test_initialization_command_sends_name_query() {
        let (server, exchange) = setup().await;

        Mock::given(method("GET"))
            .and(path("/apiinitdata"))
            .and(query_param("name", "PWR 7734"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0A1B"))
            .mount(&server)
            .await;

        let command = exchange.initialization_command("PWR 7734").await.unwrap();
        assert_eq!(command.as_str(), "0A1B");
    }

    #[tokio::test]
    async fn test_empty_command_body_is_a_failure() {
        let (server, exchange) = setup().await;

        Mock::given(method("GET"))
            .and(path("/apiinitdata"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  "))
            .mount(&server)
            .await;

        assert!(matches!(
            exchange.initialization_command("PWR-7734").await,
            Err(ExchangeError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_upload_device_info() {
        let (server, exchange) = setup().await;

        Mock::given(method("POST"))
            .and(path("/apideviceinfo"))
            .and(body_json(json!({ "name": "PWR-7734", "info": "1.4.0" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        exchange
            .upload_device_info("PWR-7734", "1.4.0")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_base_url_with_trailing_slash() {
        let server = MockServer::start().await;
        let base_url = Url::parse(&format!("{}/", server.uri())).unwrap();
        let exchange = HttpExchange::new(base_url, Duration::from_secs(5)).unwrap();

        Mock::given(method("GET"))
            .and(path("/apiinitdata"))
            .respond_with(ResponseTemplate::new(200).set_body_string("FF"))
            .mount(&server)
            .await;

        assert_eq!(
            exchange.initialization_command("X").await.unwrap().as_str(),
            "FF"
        );
    }
}
