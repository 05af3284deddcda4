//! API-key REST access to players.
//!
//! Used once per candidate for `/info`, once per household for `/groups`,
//! and as the passthrough for dashboard REST proxying. Players present
//! self-signed certificates, so TLS verification is disabled.

use bytes::Bytes;
use reqwest::{Client, Method};

use crate::error::{BridgeError, BridgeResult};
use crate::sonos::messages::{GroupsResponse, PlayerInfo};

/// Name of the API key header sent on every player request.
const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP client for the player REST API.
#[derive(Clone)]
pub struct SonosRest {
    client: Client,
    api_key: String,
}

impl SonosRest {
    /// Builds the client. TLS verification is off because players serve
    /// self-signed certificates.
    pub fn new(api_key: &str) -> BridgeResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| BridgeError::InternalFailure(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }

    /// Fetches and parses a candidate's `/info` document.
    pub async fn get_info(&self, info_url: &str) -> BridgeResult<PlayerInfo> {
        let body = self.request(Method::GET, info_url, None).await?;
        log::debug!("[REST] /info: {}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body)
            .map_err(|e| BridgeError::ParseFailed(format!("/info response: {}", e)))
    }

    /// Fetches and parses the household's `/groups` listing from the given
    /// full URL.
    pub async fn get_groups(&self, groups_url: &str) -> BridgeResult<GroupsResponse> {
        let body = self.request(Method::GET, groups_url, None).await?;
        serde_json::from_slice(&body)
            .map_err(|e| BridgeError::ParseFailed(format!("/groups response: {}", e)))
    }

    /// Raw GET passthrough, returning the response bytes.
    pub async fn get(&self, url: &str) -> BridgeResult<Bytes> {
        self.request(Method::GET, url, None).await
    }

    /// Raw POST passthrough, returning the response bytes.
    pub async fn post(&self, url: &str, body: Bytes) -> BridgeResult<Bytes> {
        self.request(Method::POST, url, Some(body)).await
    }

    async fn request(&self, method: Method, url: &str, body: Option<Bytes>) -> BridgeResult<Bytes> {
        log::debug!("[REST] {} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            log::error!("[REST] {} returned {}", url, status);
            return Err(BridgeError::HttpFetchFailed(format!(
                "{}: status {}",
                url, status
            )));
        }

        Ok(response.bytes().await?)
    }
}
