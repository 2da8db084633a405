//! HTTP client for the BiliBili, YouTube and Jetri APIs.

use super::{PlatformError, PlatformResult};
use crate::orchestrator::OrchestratorError;
use serde_json::Value as JsonValue;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for [`PlatformClient`].
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub bilibili_api_url: String,
    pub youtube_api_url: String,
    pub jetri_api_url: String,
    pub youtube_api_key: String,
    pub request_timeout_sec: u64,
    /// Check the services while opening and refuse to start if they reject us.
    pub verify_on_open: bool,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            bilibili_api_url: "https://api.bilibili.com".to_string(),
            youtube_api_url: "https://www.googleapis.com/youtube/v3".to_string(),
            jetri_api_url: "https://api.jetri.co".to_string(),
            youtube_api_key: String::new(),
            request_timeout_sec: 30,
            verify_on_open: true,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// One HTTP client shared by every job. `None` once closed.
pub struct PlatformClient {
    client: RwLock<Option<reqwest::Client>>,
    bilibili_api_url: String,
    youtube_api_url: String,
    jetri_api_url: String,
    youtube_api_key: String,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl PlatformClient {
    /// Build the client without touching the network.
    pub fn new(settings: &PlatformSettings) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_sec))
            .user_agent(concat!("vtbili-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            bilibili_api_url: settings.bilibili_api_url.trim_end_matches('/').to_string(),
            youtube_api_url: settings.youtube_api_url.trim_end_matches('/').to_string(),
            jetri_api_url: settings.jetri_api_url.trim_end_matches('/').to_string(),
            youtube_api_key: settings.youtube_api_key.clone(),
            max_attempts: settings.max_attempts.max(1),
            retry_backoff: settings.retry_backoff,
        })
    }

    /// Build the client and, if configured, verify the services accept it.
    pub async fn open(settings: &PlatformSettings) -> Result<Self, OrchestratorError> {
        let client =
            Self::new(settings).map_err(|e| OrchestratorError::connection("platform client", e))?;

        if settings.verify_on_open {
            client
                .verify()
                .await
                .map_err(|e| OrchestratorError::connection("platform client", e))?;
            info!("Platform APIs reachable, API key accepted");
        }

        Ok(client)
    }

    /// Single-attempt check: Jetri must answer and YouTube must accept the key.
    pub async fn verify(&self) -> PlatformResult<()> {
        let jetri = self.jetri_url("/live");
        self.get_json_once(&jetri, &[]).await?;

        let youtube = self.youtube_url("/videoCategories");
        self.get_json_once(
            &youtube,
            &[
                ("part", "snippet".to_string()),
                ("id", "1".to_string()),
                ("key", self.youtube_api_key.clone()),
            ],
        )
        .await?;
        Ok(())
    }

    pub fn bilibili_url(&self, path: &str) -> String {
        format!("{}{}", self.bilibili_api_url, path)
    }

    pub fn youtube_url(&self, path: &str) -> String {
        format!("{}{}", self.youtube_api_url, path)
    }

    pub fn jetri_url(&self, path: &str) -> String {
        format!("{}{}", self.jetri_api_url, path)
    }

    pub fn youtube_api_key(&self) -> &str {
        &self.youtube_api_key
    }

    /// GET a JSON document, retrying transient failures with exponential
    /// backoff.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> PlatformResult<JsonValue> {
        let mut attempt = 1;
        loop {
            match self.get_json_once(url, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        url, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once(&self, url: &str, query: &[(&str, String)]) -> PlatformResult<JsonValue> {
        let client = self.http()?;
        debug!("GET {}", url);

        let response = client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|e| PlatformError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    fn http(&self) -> PlatformResult<reqwest::Client> {
        self.client
            .read()
            .map_err(|_| PlatformError::Closed)?
            .clone()
            .ok_or(PlatformError::Closed)
    }

    /// Drop the underlying connection pool. Requests already in flight finish
    /// on their own clone; new ones fail with [`PlatformError::Closed`].
    pub fn close(&self) -> PlatformResult<()> {
        let mut guard = self.client.write().map_err(|_| PlatformError::Closed)?;
        match guard.take() {
            Some(_) => {
                info!("Platform client closed");
                Ok(())
            }
            None => Err(PlatformError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.read().map(|c| c.is_none()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings_for(url: &str) -> PlatformSettings {
        PlatformSettings {
            bilibili_api_url: url.to_string(),
            youtube_api_url: url.to_string(),
            jetri_api_url: url.to_string(),
            youtube_api_key: "test-key".to_string(),
            request_timeout_sec: 5,
            verify_on_open: true,
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_trailing_slash_removal() {
        let client = PlatformClient::new(&settings_for("http://localhost:8080/")).unwrap();
        assert_eq!(client.jetri_url("/live"), "http://localhost:8080/live");
        assert_eq!(client.youtube_api_key(), "test-key");
    }

    #[tokio::test]
    async fn test_get_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/live")
            .match_query(Matcher::UrlEncoded("group".into(), "hololive".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"live": []}"#)
            .create_async()
            .await;

        let client = PlatformClient::new(&settings_for(&server.url())).unwrap();
        let value = client
            .get_json(&client.jetri_url("/live"), &[("group", "hololive".to_string())])
            .await
            .unwrap();

        assert_eq!(value["live"], serde_json::json!([]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_up_to_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/upcoming")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = PlatformClient::new(&settings_for(&server.url())).unwrap();
        let err = client
            .get_json(&client.bilibili_url("/upcoming"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Status { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = PlatformClient::new(&settings_for(&server.url())).unwrap();
        let err = client
            .get_json(&client.bilibili_url("/missing"), &[])
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_key() {
        let mut server = mockito::Server::new_async().await;
        let _jetri = server
            .mock("GET", "/live")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let _youtube = server
            .mock("GET", "/videoCategories")
            .match_query(Matcher::Any)
            .with_status(400)
            .create_async()
            .await;

        let result = PlatformClient::open(&settings_for(&server.url())).await;
        match result {
            Err(e) => assert!(e.is_connection()),
            Ok(_) => panic!("open should fail when the API key is rejected"),
        }
    }

    #[tokio::test]
    async fn test_requests_fail_after_close() {
        let client = PlatformClient::new(&settings_for("http://127.0.0.1:9")).unwrap();
        client.close().unwrap();
        assert!(client.is_closed());

        let err = client
            .get_json(&client.jetri_url("/live"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Closed));
        assert!(matches!(client.close(), Err(PlatformError::Closed)));
    }
}
