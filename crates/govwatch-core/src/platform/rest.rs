//! REST adapter for the limits, metadata and tooling APIs

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::models::{DeployRequestRecord, DeployStatus, RawLimitMap};

use super::{DeployStatusSource, LimitSource};

/// Authenticated client for one org
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base: Url,
    access_token: String,
    api_version: String,
}

impl RestClient {
    /// Create a client from platform settings
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        if config.instance_url.is_empty() {
            return Err(Error::config("platform.instance_url is not set"));
        }

        let mut base = Url::parse(&config.instance_url)
            .map_err(|e| Error::config(format!("invalid instance url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("govwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            access_token: config.access_token.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn data_url(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("services/data/v{}/{}", self.api_version, path))
            .map_err(|e| Error::internal(format!("bad request url: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::transient(format!("{}: {e}", url.path())))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transient(format!(
                "{} returned {}: {}",
                url.path(),
                status,
                body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::transient(format!("{}: invalid body: {e}", url.path())))
    }
}

#[async_trait::async_trait]
impl LimitSource for RestClient {
    async fn fetch_raw_limits(&self) -> Result<RawLimitMap> {
        let url = self.data_url("limits")?;
        self.get_json(url).await
    }
}

#[derive(Debug, Deserialize)]
struct DeployRequestResponse {
    #[serde(rename = "deployResult")]
    deploy_result: DeployResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployResult {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    number_components_deployed: u32,
    #[serde(default)]
    number_components_total: u32,
    #[serde(default)]
    number_tests_completed: u32,
    #[serde(default)]
    number_tests_total: u32,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    records: Vec<T>,
}

fn ensure_record_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::transient(format!("invalid deployment id: {id:?}")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl DeployStatusSource for RestClient {
    async fn check_deploy_status(&self, id: &str) -> Result<DeployStatus> {
        ensure_record_id(id)?;
        let url = self.data_url(&format!("metadata/deployRequest/{id}"))?;
        let response: DeployRequestResponse = self.get_json(url).await?;
        let result = response.deploy_result;

        Ok(DeployStatus {
            id: id.to_string(),
            done: result.done,
            success: result.success,
            state: result.status.unwrap_or_else(|| "InProgress".to_string()),
            number_components_deployed: result.number_components_deployed,
            number_components_total: result.number_components_total,
            number_tests_completed: result.number_tests_completed,
            number_tests_total: result.number_tests_total,
            error_message: result.error_message,
        })
    }

    async fn query_deploy_request(&self, id: &str) -> Result<Option<DeployRequestRecord>> {
        ensure_record_id(id)?;
        let mut url = self.data_url("tooling/query/")?;
        url.query_pairs_mut().append_pair(
            "q",
            &format!(
                "SELECT Id, Status, ErrorMessage FROM DeployRequest WHERE Id = '{id}' LIMIT 1"
            ),
        );

        let response: QueryResponse<DeployRequestRecord> = self.get_json(url).await?;
        Ok(response.records.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RestClient {
        RestClient::new(&PlatformConfig {
            instance_url: server.uri(),
            access_token: "token-123".to_string(),
            api_version: "59.0".to_string(),
            request_timeout: Duration::from_secs(5),
            org: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_raw_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v59.0/limits"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "DailyApiRequests": {"Max": 100000, "Remaining": 15000},
                "DataStorageMB": {"Max": 1024, "Remaining": 1000}
            })))
            .mount(&server)
            .await;

        let limits = client_for(&server).fetch_raw_limits().await.unwrap();

        assert_eq!(limits.len(), 2);
        assert_eq!(limits.get("DailyApiRequests").unwrap().remaining, Some(15000));
    }

    #[tokio::test]
    async fn test_fetch_raw_limits_unauthorized_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v59.0/limits"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Session expired"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_raw_limits().await.unwrap_err();

        assert!(matches!(err, Error::TransientFetch(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_check_deploy_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v59.0/metadata/deployRequest/0Af5g00000ABCDEFGH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "0Af5g00000ABCDEFGH",
                "deployResult": {
                    "done": false,
                    "success": false,
                    "status": "InProgress",
                    "numberComponentsDeployed": 3,
                    "numberComponentsTotal": 10
                }
            })))
            .mount(&server)
            .await;

        let status = client_for(&server)
            .check_deploy_status("0Af5g00000ABCDEFGH")
            .await
            .unwrap();

        assert_eq!(status.state, "InProgress");
        assert_eq!(status.number_components_deployed, 3);
        assert_eq!(status.number_components_total, 10);
        assert!(!status.done);
    }

    #[tokio::test]
    async fn test_query_deploy_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v59.0/tooling/query/"))
            .and(query_param(
                "q",
                "SELECT Id, Status, ErrorMessage FROM DeployRequest WHERE Id = '0Af5g00000ABCDE' LIMIT 1",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "records": [{"Id": "0Af5g00000ABCDE", "Status": "Failed", "ErrorMessage": "Boom"}]
            })))
            .mount(&server)
            .await;

        let record = client_for(&server)
            .query_deploy_request("0Af5g00000ABCDE")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.status, "Failed");
        assert_eq!(record.error_message.as_deref(), Some("Boom"));
    }

    #[tokio::test]
    async fn test_rejects_non_alphanumeric_ids() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .query_deploy_request("x' OR Id != '")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_missing_instance_url() {
        let err = RestClient::new(&PlatformConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
