use crate::api::events::{AuthState, Snapshot, SnapshotEvent, Subscription};
use crate::api::models::AuthUser;
use crate::api::query::{Document, Fields, Query};
use crate::api::values::{decode_document, encode_fields, encode_structured_query};
use crate::api::{AuthBackend, DocumentStore};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use url::Url;

const IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1/";
const SECURE_TOKEN_BASE: &str = "https://securetoken.googleapis.com/v1/";
const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1/";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
struct Credentials {
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordAuthResponse {
    local_id: String,
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

struct Inner {
    http: HttpClient,
    config: FirebaseConfig,
    credentials: Mutex<Option<Credentials>>,
    auth: AuthState,
}

/// Firebase over REST: Identity Toolkit for accounts, Firestore for documents.
/// Live queries poll `runQuery` on the given runtime and report only changes.
#[derive(Clone)]
pub struct FirebaseClient {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl FirebaseClient {
    pub fn new(config: FirebaseConfig, runtime: Handle) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                credentials: Mutex::new(None),
                auth: AuthState::new(),
            }),
            runtime,
        })
    }

    /// Re-establishes a session from a persisted refresh token.
    pub async fn restore(&self, refresh_token: &str) -> Result<AuthUser> {
        let uid = self.inner.refresh(refresh_token).await?;
        let email = self.inner.lookup_email().await?;
        let user = AuthUser::new(uid, email);
        self.inner.auth.set(Some(user.clone()));
        Ok(user)
    }
}

impl Inner {
    fn identity_url(&self, method: &str) -> Result<Url> {
        Url::parse_with_params(
            &format!("{IDENTITY_BASE}accounts:{method}"),
            &[("key", self.config.api_key.as_str())],
        )
        .map_err(|e| ChatError::Config(e.to_string()))
    }

    fn documents_root(&self) -> String {
        format!(
            "{FIRESTORE_BASE}projects/{}/databases/(default)/documents",
            self.config.project_id
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{collection}/{id}",
            self.config.project_id
        )
    }

    fn set_credentials(&self, creds: Option<Credentials>) {
        *self.credentials.lock().unwrap_or_else(|e| e.into_inner()) = creds;
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn password_auth(&self, method: &str, email: &str, password: &str) -> Result<AuthUser> {
        let body = json!({ "email": email, "password": password, "returnSecureToken": true });
        let resp = self
            .http
            .post(self.identity_url(method)?)
            .json(&body)
            .send()
            .await?;
        let parsed: PasswordAuthResponse = read_json(resp).await?;
        self.set_credentials(Some(Credentials {
            id_token: parsed.id_token,
            refresh_token: parsed.refresh_token,
            expires_at: expiry(&parsed.expires_in),
        }));
        let user = AuthUser::new(parsed.local_id, parsed.email.unwrap_or_else(|| email.to_string()));
        self.auth.set(Some(user.clone()));
        log::info!("signed in as {}", user.uid);
        Ok(user)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{SECURE_TOKEN_BASE}token"),
            &[("key", self.config.api_key.as_str())],
        )
        .map_err(|e| ChatError::Config(e.to_string()))?;
        let resp = self
            .http
            .post(url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;
        let parsed: RefreshResponse = read_json(resp).await?;
        self.set_credentials(Some(Credentials {
            id_token: parsed.id_token,
            refresh_token: parsed.refresh_token,
            expires_at: expiry(&parsed.expires_in),
        }));
        log::debug!("refreshed id token for {}", parsed.user_id);
        Ok(parsed.user_id)
    }

    async fn lookup_email(&self) -> Result<String> {
        let token = self.id_token().await?;
        let resp = self
            .http
            .post(self.identity_url("lookup")?)
            .json(&json!({ "idToken": token }))
            .send()
            .await?;
        let json: Value = read_json(resp).await?;
        Ok(json
            .pointer("/users/0/email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn id_token(&self) -> Result<String> {
        let creds = self.credentials().ok_or(ChatError::NotSignedIn)?;
        if creds.expires_at > Instant::now() + REFRESH_MARGIN {
            return Ok(creds.id_token);
        }
        self.refresh(&creds.refresh_token).await?;
        self.credentials()
            .map(|c| c.id_token)
            .ok_or(ChatError::NotSignedIn)
    }

    /// Bearer token for the signed-in user, `None` while signed out.
    async fn bearer(&self) -> Result<Option<String>> {
        if self.credentials().is_none() {
            return Ok(None);
        }
        self.id_token().await.map(Some)
    }

    /// Signed-out requests go out with only the API key; security rules decide.
    async fn authorized(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let req = match self.bearer().await? {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        Ok(req.send().await?)
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        let (parent, collection_id) = split_collection_path(&query.collection);
        let endpoint = match parent {
            Some(parent) => format!("{}/{parent}:runQuery", self.documents_root()),
            None => format!("{}:runQuery", self.documents_root()),
        };
        let body = encode_structured_query(query, collection_id);
        let resp = self.authorized(self.http.post(&endpoint).json(&body)).await?;
        let rows: Vec<Value> = read_json(resp).await?;
        rows.iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect()
    }
}

/// Splits `chats/abc/messages` into (`Some("chats/abc")`, `"messages"`).
fn split_collection_path(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some((parent, id)) => (Some(parent), id),
        None => (None, path),
    }
}

fn expiry(expires_in: &str) -> Instant {
    let secs = expires_in.parse::<u64>().unwrap_or(3600);
    Instant::now() + Duration::from_secs(secs)
}

/// Extracts the raw `error.message` text from a Google API error body.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {status}"))
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Backend(error_message(status, &body)));
    }
    Ok(resp.json::<T>().await?)
}

async fn poll_query(
    inner: Arc<Inner>,
    query: Query,
    interval: Duration,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
) {
    let mut last: Option<Vec<Document>> = None;
    let mut last_error: Option<String> = None;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        let event = match inner.run_query(&query).await {
            Ok(docs) => {
                last_error = None;
                if last.as_ref() == Some(&docs) {
                    continue;
                }
                last = Some(docs.clone());
                Ok(Snapshot { documents: docs })
            }
            Err(e) => {
                // The next good poll is reported even if nothing changed.
                last = None;
                let text = e.to_string();
                if last_error.as_deref() == Some(text.as_str()) {
                    continue;
                }
                log::warn!("live query on {} failed: {text}", query.collection);
                last_error = Some(text);
                Err(e)
            }
        };
        if tx.send(event).is_err() {
            break;
        }
    }
}

#[async_trait]
impl AuthBackend for FirebaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        self.inner
            .password_auth("signInWithPassword", email, password)
            .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        self.inner.password_auth("signUp", email, password).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.inner.set_credentials(None);
        self.inner.auth.set(None);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.inner.auth.current()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.inner.auth.watch()
    }

    fn session_token(&self) -> Option<String> {
        self.inner.credentials().map(|c| c.refresh_token)
    }
}

#[async_trait]
impl DocumentStore for FirebaseClient {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let endpoint = format!("{}/{collection}/{id}", self.inner.documents_root());
        let resp = self.inner.authorized(self.inner.http.get(&endpoint)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json: Value = read_json(resp).await?;
        decode_document(&json).map(Some)
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}:batchGet", self.inner.documents_root());
        let names: Vec<String> = ids
            .iter()
            .map(|id| self.inner.document_name(collection, id))
            .collect();
        let resp = self
            .inner
            .authorized(self.inner.http.post(&endpoint).json(&json!({ "documents": names })))
            .await?;
        let rows: Vec<Value> = read_json(resp).await?;
        rows.iter()
            .filter_map(|row| row.get("found"))
            .map(decode_document)
            .collect()
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let endpoint = format!("{}/{collection}/{id}", self.inner.documents_root());
        let body = json!({ "fields": encode_fields(&fields) });
        let resp = self
            .inner
            .authorized(self.inner.http.patch(&endpoint).json(&body))
            .await?;
        read_json::<Value>(resp).await.map(|_| ())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let endpoint = format!("{}/{collection}", self.inner.documents_root());
        let body = json!({ "fields": encode_fields(&fields) });
        let resp = self
            .inner
            .authorized(self.inner.http.post(&endpoint).json(&body))
            .await?;
        let json: Value = read_json(resp).await?;
        Ok(decode_document(&json)?.id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut url = Url::parse(&format!("{}/{collection}/{id}", self.inner.documents_root()))
            .map_err(|e| ChatError::Config(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for field in fields.keys() {
                pairs.append_pair("updateMask.fieldPaths", field);
            }
            pairs.append_pair("currentDocument.exists", "true");
        }
        let body = json!({ "fields": encode_fields(&fields) });
        let resp = self
            .inner
            .authorized(self.inner.http.patch(url).json(&body))
            .await?;
        read_json::<Value>(resp).await.map(|_| ())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        self.inner.run_query(query).await
    }

    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = self.inner.config.poll_interval;
        let task = self
            .runtime
            .spawn(poll_query(self.inner.clone(), query, interval, tx));
        Subscription::new(rx, move || task.abort())
    }
}
