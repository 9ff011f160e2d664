//! Authenticated HTTPS request channel to the client's local API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::lockfile::{SessionCredential, LCU_USERNAME};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const READY_CHECK_ACCEPT_PATH: &str = "/lol-matchmaking/v1/ready-check/accept";
pub const OWNED_CHAMPIONS_PATH: &str = "/lol-champions/v1/owned-champions-minimal";

/// Path of one champion-select action.
pub fn champ_select_action_path(action_id: i64) -> String {
    format!("/lol-champ-select/v1/session/actions/{action_id}")
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        body: String,
    },
    #[error("{method} {path} failed: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A successful (2xx) response. `body` is `Null` when the response was empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Issues commands against the session's API origin.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, RequestError>;
}

/// HTTPS client bound to one session's port and password.
///
/// The client serves a self-signed certificate for `127.0.0.1`, so certificate
/// and hostname validation are both disabled. Nothing else is ever contacted
/// through this client.
#[derive(Clone)]
pub struct LcuApi {
    client: reqwest::Client,
    base_url: String,
    password: String,
}

impl LcuApi {
    pub fn new(credential: &SessionCredential) -> Result<Self, reqwest::Error> {
        Self::with_base_url(credential.base_url(), credential.password.clone())
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
        })
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Requester for LcuApi {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, RequestError> {
        let transport = |source| RequestError::Transport {
            method: method.clone(),
            path: path.to_string(),
            source,
        };

        let mut builder = self
            .client
            .request(method.clone(), format!("{}{path}", self.base_url))
            .basic_auth(LCU_USERNAME, Some(&self.password));
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RequestError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        tracing::trace!(%method, path, status = status.as_u16(), "api request ok");
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Accepts the current ready check.
pub async fn accept_ready_check(api: &dyn Requester) -> Result<(), RequestError> {
    api.request(Method::POST, READY_CHECK_ACCEPT_PATH, None).await?;
    Ok(())
}

/// Sets the champion on a champion-select action. `completed = false` hovers,
/// `completed = true` locks.
pub async fn patch_action(
    api: &dyn Requester,
    action_id: i64,
    champion_id: i64,
    completed: bool,
) -> Result<(), RequestError> {
    api.request(
        Method::PATCH,
        &champ_select_action_path(action_id),
        Some(json!({ "championId": champion_id, "completed": completed })),
    )
    .await?;
    Ok(())
}

#[derive(Deserialize)]
struct MinimalChampion {
    name: String,
    id: i64,
    #[serde(default)]
    ownership: Ownership,
}

#[derive(Deserialize, Default)]
struct Ownership {
    #[serde(default)]
    owned: bool,
}

/// Champions the logged-in account owns, keyed by display name.
pub async fn owned_champions(api: &dyn Requester) -> Result<BTreeMap<String, i64>, RequestError> {
    let response = api.request(Method::GET, OWNED_CHAMPIONS_PATH, None).await?;
    tracing::debug!(status = response.status, "owned champions fetched");
    let champions: Vec<MinimalChampion> =
        serde_json::from_value(response.body).map_err(|source| RequestError::Decode {
            path: OWNED_CHAMPIONS_PATH.to_string(),
            source,
        })?;
    Ok(champions
        .into_iter()
        .filter(|c| c.ownership.owned)
        .map(|c| (c.name, c.id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // "riot:pw" in base64.
    const BASIC_AUTH: &str = "Basic cmlvdDpwdw==";

    async fn api_for(server: &MockServer) -> LcuApi {
        LcuApi::with_base_url(server.uri(), "pw").unwrap()
    }

    #[test]
    fn action_path_includes_id() {
        assert_eq!(
            champ_select_action_path(7),
            "/lol-champ-select/v1/session/actions/7"
        );
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let api = LcuApi::with_base_url("https://127.0.0.1:2999/", "pw").unwrap();
        assert_eq!(api.base_url(), "https://127.0.0.1:2999");
    }

    #[tokio::test]
    async fn accept_posts_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(READY_CHECK_ACCEPT_PATH))
            .and(header("authorization", BASIC_AUTH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        accept_ready_check(&api).await.unwrap();
    }

    #[tokio::test]
    async fn patch_action_sends_champion_and_completed() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/lol-champ-select/v1/session/actions/3"))
            .and(body_json(json!({ "championId": 103, "completed": true })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        patch_action(&api, 3, 103, true).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(READY_CHECK_ACCEPT_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_string("no ready check"))
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let err = accept_ready_check(&api).await.unwrap_err();
        match err {
            RequestError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no ready check");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Reserve a loopback port, then free it so nothing listens there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let api = LcuApi::with_base_url(format!("http://127.0.0.1:{port}"), "pw").unwrap();
        let err = accept_ready_check(&api).await.unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
    }

    #[tokio::test]
    async fn owned_champions_keeps_only_owned_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(OWNED_CHAMPIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "Ahri", "id": 103, "ownership": { "owned": true } },
                { "name": "Annie", "id": 1, "ownership": { "owned": false } },
                { "name": "Garen", "id": 86, "ownership": { "owned": true } },
                { "name": "Teemo", "id": 17 }
            ])))
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let owned = owned_champions(&api).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert_eq!(owned.get("Ahri"), Some(&103));
        assert_eq!(owned.get("Garen"), Some(&86));
    }

    #[tokio::test]
    async fn owned_champions_rejects_unexpected_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(OWNED_CHAMPIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": true })))
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let err = owned_champions(&api).await.unwrap_err();
        assert!(matches!(err, RequestError::Decode { .. }));
    }
}
