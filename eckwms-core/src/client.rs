//! HTTP client for communicating with the eckWMS relay.

use crate::error::{ClientError, ErrorBody, ErrorKind};
use crate::models::{
    ConfirmRequest, ConfirmResponse, InstanceInfo, PullRequest, PullResponse, Reachability,
    RegisterInstanceRequest, RegistrationResponse, StatusResponse, SubmitScanRequest,
    SubmitScanResponse,
};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Header carrying the instance API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Header carrying the registration token, when the relay requires one.
pub const REGISTRATION_TOKEN_HEADER: &str = "X-Registration-Token";

/// HTTP client for the eckWMS relay.
#[derive(Clone)]
pub struct EckwmsClient {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
}

impl EckwmsClient {
    /// Create a new client. `api_key` may be omitted for registration.
    pub fn new(relay_url: &str, api_key: Option<&str>) -> Result<Self> {
        if relay_url.trim().is_empty() {
            return Err(ClientError::Config("Relay URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            relay_url: relay_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    /// Clone this client with a different API key.
    pub fn with_api_key(&self, api_key: &str) -> Self {
        Self {
            client: self.client.clone(),
            relay_url: self.relay_url.clone(),
            api_key: Some(api_key.to_string()),
        }
    }

    /// Register a new instance and receive its credential.
    ///
    /// The relay applies `request.tier` only when `admin_token` is given.
    pub async fn register(
        &self,
        request: &RegisterInstanceRequest,
        registration_token: Option<&str>,
        admin_token: Option<&str>,
    ) -> Result<RegistrationResponse> {
        let mut builder = self
            .client
            .post(self.url("/api/v1/instances/register"))
            .json(request);
        if let Some(token) = registration_token {
            builder = builder.header(REGISTRATION_TOKEN_HEADER, token);
        }
        if let Some(token) = admin_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode(response).await
    }

    /// Refresh this instance's reachability metadata.
    pub async fn heartbeat(&self, reachability: &Reachability) -> Result<InstanceInfo> {
        self.post("/api/v1/instances/heartbeat", reachability).await
    }

    /// Fetch this instance's registry entry.
    pub async fn me(&self) -> Result<InstanceInfo> {
        self.get("/api/v1/instances/me").await
    }

    /// Submit a scan for buffering.
    pub async fn submit(&self, request: &SubmitScanRequest) -> Result<SubmitScanResponse> {
        self.post("/api/v1/scans", request).await
    }

    /// Pull buffered scans. Returned scans are marked delivered on the relay.
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        self.post("/api/v1/scans/pull", request).await
    }

    /// Confirm receipt of pulled scans.
    pub async fn confirm(&self, scan_ids: &[Uuid]) -> Result<ConfirmResponse> {
        let request = ConfirmRequest {
            scan_ids: scan_ids.iter().map(Uuid::to_string).collect(),
        };
        self.post("/api/v1/scans/confirm", &request).await
    }

    /// Per-status scan counts for this instance.
    pub async fn status(&self) -> Result<StatusResponse> {
        self.get("/api/v1/scans/status").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.relay_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClientError::Config("No API key configured".to_string()))?;
        Ok(builder.header(API_KEY_HEADER, key))
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let builder = self.authorized(self.client.post(self.url(path)).json(body))?;
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode(response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let builder = self.authorized(self.client.get(self.url(path)))?;
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()));
    }

    Err(ClientError::Api {
        status: status.as_u16(),
        body: error_body(status.as_u16(), &bytes),
    })
}

fn error_body(status: u16, bytes: &[u8]) -> ErrorBody {
    serde_json::from_slice::<ErrorBody>(bytes).unwrap_or_else(|_| {
        ErrorBody::new(
            ErrorKind::from_status(status),
            String::from_utf8_lossy(bytes).trim().to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = EckwmsClient::new("https://relay.example.com/", Some("eck_test")).unwrap();
        assert_eq!(
            client.url("/api/v1/scans"),
            "https://relay.example.com/api/v1/scans"
        );
    }

    #[test]
    fn rejects_empty_url() {
        assert!(matches!(
            EckwmsClient::new("  ", None),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn structured_error_body_is_decoded() {
        let body = error_body(
            401,
            br#"{"kind":"authentication_error","message":"Invalid API key"}"#,
        );
        assert_eq!(body.kind, ErrorKind::AuthenticationError);
        assert_eq!(body.message, "Invalid API key");
    }

    #[test]
    fn plain_error_body_falls_back_to_status() {
        let body = error_body(502, b"Bad Gateway\n");
        assert_eq!(body.kind, ErrorKind::TransientError);
        assert_eq!(body.message, "Bad Gateway");
    }

    #[tokio::test]
    async fn requests_without_key_fail_before_sending() {
        let client = EckwmsClient::new("http://127.0.0.1:9", None).unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
