//! Auth session types and their on-disk persistence.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// The authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
}

/// Token-backed session as returned by the auth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
  #[serde(default)]
  pub token_type: Option<String>,
  #[serde(default)]
  pub expires_in: Option<i64>,
  /// Unix seconds
  #[serde(default)]
  pub expires_at: Option<i64>,
  pub user: User,
}

impl Session {
  /// Fill in `expires_at` from `expires_in` when the server only sent the latter.
  pub fn stamped(mut self) -> Self {
    if self.expires_at.is_none() {
      if let Some(expires_in) = self.expires_in {
        self.expires_at = Some(Utc::now().timestamp() + expires_in);
      }
    }
    self
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now().timestamp())
  }

  fn is_expired_at(&self, now: i64) -> bool {
    match self.expires_at {
      Some(expires_at) => expires_at - EXPIRY_MARGIN_SECS <= now,
      None => false,
    }
  }
}

/// Persists the session between runs as a JSON file.
///
/// An ephemeral store keeps nothing on disk.
#[derive(Debug, Clone)]
pub struct SessionStore {
  path: Option<PathBuf>,
}

impl SessionStore {
  pub fn at(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
    }
  }

  pub fn ephemeral() -> Self {
    Self { path: None }
  }

  pub fn load(&self) -> Result<Option<Session>> {
    let Some(path) = &self.path else {
      return Ok(None);
    };
    if !path.exists() {
      return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
    let session = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse session file {}: {}", path.display(), e))?;

    Ok(Some(session))
  }

  pub fn save(&self, session: &Session) -> Result<()> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    ensure_parent(path)?;

    let contents = serde_json::to_string(session)
      .map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", path.display(), e))
  }

  pub fn clear(&self) -> Result<()> {
    match &self.path {
      Some(path) if path.exists() => std::fs::remove_file(path)
        .map_err(|e| eyre!("Failed to remove session file {}: {}", path.display(), e)),
      _ => Ok(()),
    }
  }
}

fn ensure_parent(path: &Path) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
  }
  Ok(())
}
