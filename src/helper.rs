//! Client for the local helper service that performs OS-level actions.
//!
//! Every call resolves to text: the response body on success, otherwise a
//! synthesized error string. Nothing here returns an error to the caller.

use crate::error::Result;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

/// Default base URL of the local helper service
pub const DEFAULT_HELPER_URL: &str = "http://localhost:5099/windowssettings";

#[derive(Debug, Clone)]
pub struct HelperClient {
    http: reqwest::Client,
    base: String,
}

impl HelperClient {
    /// Create a client for the helper rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// POST `body` as JSON to `path`.
    pub async fn post_json<T>(&self, path: &str, body: &T) -> String
    where
        T: Serialize + ?Sized,
    {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send().await;
        Self::into_text(&url, response).await
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> String {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await;
        Self::into_text(&url, response).await
    }

    async fn into_text(url: &str, response: reqwest::Result<reqwest::Response>) -> String {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Helper request to {} failed: {}", url, e);
                return format!("http request failed: {}", e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Helper request to {} returned {}", url, status);
            return format!("http request failed with {}", status.as_u16());
        }

        match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read helper response from {}: {}", url, e);
                format!("http request failed: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoint_joining() {
        let helper = HelperClient::new("http://localhost:5099/windowssettings/").unwrap();
        assert_eq!(helper.base_url(), "http://localhost:5099/windowssettings");
        assert_eq!(
            helper.endpoint("settheme/"),
            "http://localhost:5099/windowssettings/settheme/"
        );
        assert_eq!(
            helper.endpoint("/LaunchApp/"),
            "http://localhost:5099/windowssettings/LaunchApp/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HelperClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_post_returns_body_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/windowssettings/settheme/"))
            .and(body_json("Dark"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Theme set to Dark"))
            .expect(1)
            .mount(&server)
            .await;

        let helper = HelperClient::new(&format!("{}/windowssettings", server.uri())).unwrap();
        assert_eq!(helper.post_json("settheme/", "Dark").await, "Theme set to Dark");
    }

    #[tokio::test]
    async fn test_non_success_status_becomes_error_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/windowssettings/GetProcessInfo/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let helper = HelperClient::new(&format!("{}/windowssettings", server.uri())).unwrap();
        assert_eq!(helper.get("GetProcessInfo/").await, "http request failed with 500");
    }

    #[tokio::test]
    async fn test_unreachable_helper_becomes_error_text() {
        // Nothing listens on port 9 of the loopback interface
        let helper = HelperClient::new("http://127.0.0.1:9/windowssettings").unwrap();
        let result = helper.post_json("LaunchApp/", "notepad").await;
        assert!(result.starts_with("http request failed: "), "got {}", result);
    }
}
