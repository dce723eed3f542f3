use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::config::IndexingConfig;

const INDEXING_SCOPE: &str = "https://www.googleapis.com/auth/indexing";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Something that can tell a search engine a URL was updated.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Publish one `URL_UPDATED` notification and return the raw response.
    async fn publish(&self, url: &str) -> Result<serde_json::Value>;
}

/// The fields of a Google service-account key file that signing needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid service account key file")
    }

    /// Sign a short-lived assertion for the Indexing scope.
    pub fn sign_assertion(&self, now: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: INDEXING_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Service account private key is not a valid RSA PEM key")?;
        jsonwebtoken::encode(&header, &claims, &key).context("Failed to sign token assertion")
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    url: &'a str,
    #[serde(rename = "type")]
    notification_type: &'static str,
}

/// Google Indexing API client authenticated with a service-account key file.
///
/// The key file is read on every call, so rotating it on disk takes effect
/// without a restart.
pub struct GoogleIndexer {
    client: reqwest::Client,
    key_path: PathBuf,
    endpoint: String,
}

impl GoogleIndexer {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            key_path: config.key_path.clone(),
            endpoint: config.endpoint.clone(),
        })
    }

    async fn load_key(&self) -> Result<ServiceAccountKey> {
        let content = tokio::fs::read_to_string(&self.key_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read service account key: {}",
                    self.key_path.display()
                )
            })?;
        ServiceAccountKey::from_json(&content)
    }

    async fn access_token(&self, key: &ServiceAccountKey) -> Result<String> {
        let assertion = key.sign_assertion(chrono::Utc::now().timestamp())?;

        debug!("Requesting access token from {}", key.token_uri);

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Failed to send token request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token endpoint error ({}): {}", status, error_body);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl Indexer for GoogleIndexer {
    async fn publish(&self, url: &str) -> Result<serde_json::Value> {
        let key = self.load_key().await?;
        let token = self.access_token(&key).await?;

        let request = PublishRequest {
            url,
            notification_type: "URL_UPDATED",
        };

        debug!("Publishing URL_UPDATED for {}", url);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Indexing API")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Indexing API error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse Indexing API response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
        Form, Json, Router,
    };
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const TEST_PEM: &str = include_str!("../tests/fixtures/test_service_account_key.pem");

    #[derive(Clone, Default)]
    struct FakeGoogle {
        publish_status: Option<StatusCode>,
        published: Arc<Mutex<Vec<serde_json::Value>>>,
        assertions: Arc<Mutex<Vec<String>>>,
    }

    async fn fake_token(
        State(state): State<FakeGoogle>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        assert_eq!(form.get("grant_type").map(String::as_str), Some(JWT_BEARER_GRANT));
        state
            .assertions
            .lock()
            .await
            .push(form.get("assertion").cloned().unwrap_or_default());
        Json(serde_json::json!({
            "access_token": "test-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        }))
    }

    async fn fake_publish(
        State(state): State<FakeGoogle>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if auth != "Bearer test-access-token" {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "bad token"})),
            );
        }
        if let Some(status) = state.publish_status {
            return (status, Json(serde_json::json!({"error": {"code": status.as_u16()}})));
        }
        state.published.lock().await.push(body.clone());
        (
            StatusCode::OK,
            Json(serde_json::json!({"urlNotificationMetadata": {"url": body["url"]}})),
        )
    }

    async fn spawn_fake_google(state: FakeGoogle) -> String {
        let app = Router::new()
            .route("/token", post(fake_token))
            .route("/publish", post(fake_publish))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn write_key_file(token_uri: &str) -> tempfile::NamedTempFile {
        let key = serde_json::json!({
            "type": "service_account",
            "client_email": "indexer@test-project.iam.gserviceaccount.com",
            "private_key": TEST_PEM,
            "private_key_id": "kid-1",
            "token_uri": token_uri,
        });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(key.to_string().as_bytes()).unwrap();
        file
    }

    fn indexer_for(base: &str, key_file: &tempfile::NamedTempFile) -> GoogleIndexer {
        GoogleIndexer::new(&IndexingConfig {
            key_path: key_file.path().to_path_buf(),
            endpoint: format!("{}/publish", base),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_publish_request_shape() {
        let body = serde_json::to_value(PublishRequest {
            url: "https://example.com/a",
            notification_type: "URL_UPDATED",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"url": "https://example.com/a", "type": "URL_UPDATED"})
        );
    }

    #[test]
    fn test_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "a@b.c", "private_key": "pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
        assert!(key.private_key_id.is_none());
    }

    #[test]
    fn test_key_missing_fields_is_error() {
        assert!(ServiceAccountKey::from_json(r#"{"client_email": "a@b.c"}"#).is_err());
    }

    #[test]
    fn test_bad_pem_is_error() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "a@b.c", "private_key": "not a key"}"#,
        )
        .unwrap();
        assert!(key.sign_assertion(0).is_err());
    }

    #[test]
    fn test_assertion_carries_scope_and_kid() {
        let key = ServiceAccountKey {
            client_email: "indexer@test".to_string(),
            private_key: TEST_PEM.to_string(),
            private_key_id: Some("kid-1".to_string()),
            token_uri: "https://oauth2.example/token".to_string(),
        };
        let jwt = key.sign_assertion(1_700_000_000).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("kid-1"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.set_audience(&["https://oauth2.example/token"]);
        let data = jsonwebtoken::decode::<serde_json::Value>(
            &jwt,
            &jsonwebtoken::DecodingKey::from_secret(b""),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims["iss"], "indexer@test");
        assert_eq!(data.claims["scope"], INDEXING_SCOPE);
        assert_eq!(data.claims["exp"], 1_700_000_000 + ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn test_publish_against_fake_google() {
        let state = FakeGoogle::default();
        let base = spawn_fake_google(state.clone()).await;
        let key_file = write_key_file(&format!("{}/token", base));
        let indexer = indexer_for(&base, &key_file);

        let response = indexer.publish("https://example.com/page").await.unwrap();
        assert_eq!(
            response["urlNotificationMetadata"]["url"],
            "https://example.com/page"
        );

        let published = state.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["type"], "URL_UPDATED");
        assert_eq!(state.assertions.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_error_status_is_reported() {
        let state = FakeGoogle {
            publish_status: Some(StatusCode::TOO_MANY_REQUESTS),
            ..FakeGoogle::default()
        };
        let base = spawn_fake_google(state.clone()).await;
        let key_file = write_key_file(&format!("{}/token", base));
        let indexer = indexer_for(&base, &key_file);

        let err = indexer.publish("https://example.com/page").await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert!(state.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_file_is_reported() {
        let indexer = GoogleIndexer::new(&IndexingConfig {
            key_path: PathBuf::from("/nonexistent/key.json"),
            ..IndexingConfig::default()
        })
        .unwrap();
        let err = indexer.publish("https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/key.json"));
    }
}
