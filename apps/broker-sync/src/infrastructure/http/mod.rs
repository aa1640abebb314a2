//! HTTP Token Endpoint Adapter
//!
//! [`AuthApi`] over the provider's REST auth base URL.
//!
//! - `POST {base}/auth/accesstokenrequest`
//! - `GET {base}/account/list` with a bearer token

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::{ApiError, AuthApi, TokenRequest, TokenResponse};
use crate::domain::session::ProviderAccount;

const TOKEN_PATH: &str = "auth/accesstokenrequest";
const ACCOUNTS_PATH: &str = "account/list";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-backed token endpoint client.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create an adapter around an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenResponse, ApiError> {
        tracing::debug!(user = %request.name, retry = request.ticket.is_some(), "Requesting token");
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(response).await
    }

    async fn list_accounts(&self, token: &str) -> Result<Vec<ProviderAccount>, ApiError> {
        let response = self
            .client
            .get(self.url(ACCOUNTS_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{AppIdentity, TokenOutcome};
    use crate::domain::credentials::CredentialFields;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_request() -> TokenRequest {
        TokenRequest::new(
            &CredentialFields::new("trader01", "hunter2"),
            &AppIdentity {
                app_id: "broker-sync".into(),
                app_version: "1.0".into(),
                cid: "8".into(),
                sec: "s".into(),
            },
            "device-1",
        )
    }

    #[tokio::test]
    async fn posts_camel_case_token_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/accesstokenrequest"))
            .and(body_partial_json(json!({
                "name": "trader01",
                "password": "hunter2",
                "appId": "broker-sync",
                "deviceId": "device-1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok",
                "expirationTime": "2030-01-01T00:00:00Z",
                "userId": 7,
                "name": "trader01",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(server.uri()).unwrap();
        let response = api.request_token(&token_request()).await.unwrap();

        assert!(matches!(response.into_outcome(), TokenOutcome::Granted(_)));
    }

    #[tokio::test]
    async fn ticket_retry_carries_ticket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"p-ticket": "tk"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errorText": "nope"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(format!("{}/", server.uri())).unwrap();
        let response = api
            .request_token(&token_request().with_ticket("tk".into()))
            .await
            .unwrap();

        assert_eq!(response.error_text.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn lists_accounts_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/list"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "ACC1", "active": true},
                {"id": 2, "name": "ACC2"},
            ])))
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(server.uri()).unwrap();
        let accounts = api.list_accounts("tok").await.unwrap();

        assert_eq!(accounts.len(), 2);
        assert!(accounts[1].active);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.list_accounts("stale").await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(server.uri()).unwrap();
        let err = api.list_accounts("tok").await.unwrap_err();

        assert!(matches!(err, ApiError::Status { status: 503, ref body } if body == "maintenance"));
    }

    #[tokio::test]
    async fn undecodable_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let api = HttpAuthApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.list_accounts("tok").await,
            Err(ApiError::Decode(_))
        ));
    }
}
