//! Optional post-processing of the final semantic fragment through an HTTP
//! conversion service.

use async_trait::async_trait;
use config::ConversionConfig;
use errors::{QueryError, QueryResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of one conversion call. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

impl ConvertResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into())
        }
    }
}

#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, raw: &str) -> ConvertResult;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertRequest<'a> {
    app_id: &'a str,
    supplier: u32,
    version: &'a str,
    origin: &'a str
}

/// Posts the raw semantic text to the configured conversion endpoint.
#[derive(Debug, Clone)]
pub struct ConversionPostProcessor {
    client: Client,
    config: ConversionConfig
}

impl ConversionPostProcessor {
    pub fn new(config: ConversionConfig) -> QueryResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QueryError::conversion(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn post(&self, raw: &str) -> Result<serde_json::Value, String> {
        let body = ConvertRequest {
            app_id: &self.config.app_id,
            supplier: self.config.supplier,
            version: &self.config.version,
            origin: raw
        };

        debug!(url = %self.config.api_url, len = raw.len(), "Posting conversion request");

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.authorization)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("conversion request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("conversion request failed: {}", status.as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("conversion response was not JSON: {e}"))
    }
}

#[async_trait]
impl Converter for ConversionPostProcessor {
    async fn convert(&self, raw: &str) -> ConvertResult {
        match self.post(raw).await {
            Ok(data) => {
                info!(url = %self.config.api_url, "Conversion succeeded");
                ConvertResult::ok(data)
            }
            Err(error) => {
                warn!(url = %self.config.api_url, error = %error, "Conversion failed");
                ConvertResult::failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processor(server: &MockServer) -> ConversionPostProcessor {
        let mut config = ConversionConfig::new(format!("{}/convert", server.uri()), "secret-token");
        config.app_id = "app-9".to_string();
        ConversionPostProcessor::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_convert_posts_expected_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/convert"))
            .and(header("Authorization", "Bearer secret-token"))
            .and(body_json(json!({
                "appId": "app-9",
                "supplier": 0,
                "version": "lastest",
                "origin": "{\"intent\":{}}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "answer": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = processor(&server).convert("{\"intent\":{}}").await;

        assert!(result.success);
        assert_eq!(result.data.unwrap()["answer"], "ok");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_convert_non_success_status_is_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/convert"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = processor(&server).convert("raw").await;

        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error.as_deref(), Some("conversion request failed: 503"));
    }

    #[tokio::test]
    async fn test_convert_non_json_body_is_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = processor(&server).convert("raw").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not JSON"));
    }

    #[tokio::test]
    async fn test_convert_unreachable_is_failure() {
        let config = ConversionConfig::new("http://127.0.0.1:1/convert", "t");
        let result = ConversionPostProcessor::new(config)
            .unwrap()
            .convert("raw")
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("conversion request failed"));
    }

    #[test]
    fn test_convert_result_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ConvertResult::failed("boom")).unwrap();
        assert_eq!(json, json!({"success": false, "error": "boom"}));
    }
}
