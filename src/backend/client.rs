use crate::backend::{Backend, Filter, Select, Session, SessionStore, User};
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Supabase client: GoTrue for auth, PostgREST for tables and RPC.
///
/// Constructed once at startup and shared; the session lives inside the
/// client and is mirrored to a `SessionStore` so it survives restarts.
#[derive(Clone)]
pub struct SupabaseClient {
  http: reqwest::Client,
  base: Url,
  anon_key: String,
  session: Arc<RwLock<Option<Session>>>,
  store: SessionStore,
}

/// Error body shapes used by the auth and REST APIs.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
  message: Option<String>,
  msg: Option<String>,
  error_description: Option<String>,
  hint: Option<String>,
}

impl SupabaseClient {
  pub fn new(config: &Config, store: SessionStore) -> Result<Self> {
    let anon_key = config.anon_key()?;
    let base = parse_base(&config.backend.url)?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let session = match store.load() {
      Ok(session) => session,
      Err(e) => {
        warn!(error = %e, "Ignoring unreadable stored session");
        None
      }
    };

    Ok(Self {
      http,
      base,
      anon_key,
      session: Arc::new(RwLock::new(session)),
      store,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  fn table_url(&self, table: &str) -> Result<Url> {
    self.endpoint(&format!("rest/v1/{}", table))
  }

  /// Attach the API key and the best available bearer token.
  async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    let token = match self.session().await {
      Ok(Some(session)) => session.access_token,
      Ok(None) => self.anon_key.clone(),
      Err(e) => {
        warn!(error = %e, "Session unavailable, falling back to anon key");
        self.anon_key.clone()
      }
    };
    request.header("apikey", &self.anon_key).bearer_auth(token)
  }

  async fn refresh(&self, stale: &Session) -> Result<Session> {
    debug!("Refreshing expired session");
    let url = self.endpoint("auth/v1/token?grant_type=refresh_token")?;

    let response = self
      .http
      .post(url)
      .header("apikey", &self.anon_key)
      .json(&json!({ "refresh_token": stale.refresh_token }))
      .send()
      .await
      .map_err(|e| eyre!("Failed to refresh session: {}", e))?;

    let session: Session = read_json(response, "session refresh").await?;
    Ok(self.remember(session).await)
  }

  async fn remember(&self, session: Session) -> Session {
    let session = session.stamped();
    if let Err(e) = self.store.save(&session) {
      warn!(error = %e, "Failed to persist session");
    }
    *self.session.write().await = Some(session.clone());
    session
  }

  async fn forget(&self) {
    *self.session.write().await = None;
    if let Err(e) = self.store.clear() {
      warn!(error = %e, "Failed to remove persisted session");
    }
  }
}

impl Backend for SupabaseClient {
  async fn session(&self) -> Result<Option<Session>> {
    let current = self.session.read().await.clone();
    match current {
      Some(session) if session.is_expired() => self.refresh(&session).await.map(Some),
      other => Ok(other),
    }
  }

  async fn user(&self) -> Result<Option<User>> {
    let Some(session) = self.session().await? else {
      return Ok(None);
    };

    let response = self
      .http
      .get(self.endpoint("auth/v1/user")?)
      .header("apikey", &self.anon_key)
      .bearer_auth(&session.access_token)
      .send()
      .await
      .map_err(|e| eyre!("Failed to get user: {}", e))?;

    if matches!(
      response.status(),
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
      return Ok(None);
    }

    read_json(response, "get user").await.map(Some)
  }

  async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
    let response = self
      .http
      .post(self.endpoint("auth/v1/token?grant_type=password")?)
      .header("apikey", &self.anon_key)
      .json(&json!({ "email": email, "password": password }))
      .send()
      .await
      .map_err(|e| eyre!("Failed to sign in: {}", e))?;

    let session: Session = read_json(response, "sign in").await?;
    info!(user = %session.user.id, "Signed in");
    Ok(self.remember(session).await)
  }

  async fn sign_out(&self) -> Result<()> {
    let Some(session) = self.session().await? else {
      return Ok(());
    };

    let response = self
      .http
      .post(self.endpoint("auth/v1/logout")?)
      .header("apikey", &self.anon_key)
      .bearer_auth(&session.access_token)
      .send()
      .await
      .map_err(|e| eyre!("Failed to sign out: {}", e))?;
    ensure_success(response, "sign out").await?;

    self.forget().await;
    Ok(())
  }

  async fn select(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
    let request = self
      .http
      .get(self.table_url(table)?)
      .query(&select.to_params());

    let response = self
      .authorized(request)
      .await
      .send()
      .await
      .map_err(|e| eyre!("Failed to query {}: {}", table, e))?;

    read_json(response, table).await
  }

  async fn insert(&self, table: &str, rows: &[Value]) -> Result<Vec<Value>> {
    let request = self
      .http
      .post(self.table_url(table)?)
      .header("Prefer", "return=representation")
      .json(rows);

    let response = self
      .authorized(request)
      .await
      .send()
      .await
      .map_err(|e| eyre!("Failed to insert into {}: {}", table, e))?;

    read_json(response, table).await
  }

  async fn update(&self, table: &str, filter: &Filter, patch: &Value) -> Result<Vec<Value>> {
    if filter.is_empty() {
      return Err(eyre!("Refusing unfiltered update on {}", table));
    }

    let request = self
      .http
      .patch(self.table_url(table)?)
      .query(&filter.to_params())
      .header("Prefer", "return=representation")
      .json(patch);

    let response = self
      .authorized(request)
      .await
      .send()
      .await
      .map_err(|e| eyre!("Failed to update {}: {}", table, e))?;

    read_json(response, table).await
  }

  async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
    if filter.is_empty() {
      return Err(eyre!("Refusing unfiltered delete on {}", table));
    }

    let request = self
      .http
      .delete(self.table_url(table)?)
      .query(&filter.to_params());

    let response = self
      .authorized(request)
      .await
      .send()
      .await
      .map_err(|e| eyre!("Failed to delete from {}: {}", table, e))?;

    ensure_success(response, table).await
  }

  async fn rpc(&self, function: &str, params: &Value) -> Result<Value> {
    let request = self
      .http
      .post(self.endpoint(&format!("rest/v1/rpc/{}", function))?)
      .json(params);

    let response = self
      .authorized(request)
      .await
      .send()
      .await
      .map_err(|e| eyre!("Failed to call {}: {}", function, e))?;

    read_json(response, function).await
  }
}

/// Parse the project URL, forcing a trailing slash so joins append.
fn parse_base(raw: &str) -> Result<Url> {
  let normalized = if raw.ends_with('/') {
    raw.to_string()
  } else {
    format!("{}/", raw)
  };
  Url::parse(&normalized).map_err(|e| eyre!("Invalid backend URL {}: {}", raw, e))
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<()> {
  let status = response.status();
  if status.is_success() {
    return Ok(());
  }
  let body = response.text().await.unwrap_or_default();
  Err(eyre!("{} failed ({}): {}", what, status, error_message(&body)))
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(eyre!("{} failed ({}): {}", what, status, error_message(&body)));
  }

  response
    .json::<T>()
    .await
    .map_err(|e| eyre!("Failed to parse {} response: {}", what, e))
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
  let parsed: ApiError = serde_json::from_str(body).unwrap_or_default();
  let message = parsed
    .message
    .or(parsed.msg)
    .or(parsed.error_description)
    .unwrap_or_else(|| body.trim().to_string());

  match parsed.hint {
    Some(hint) => format!("{} (hint: {})", message, hint),
    None => message,
  }
}
