use crate::backend::{single, Backend, Select, User};
use crate::repo::{decode, logged, owned_by, write_payload, Profile};
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

const TABLE: &str = "perfil";

/// The user's business profile; at most one row per user.
pub struct ProfileRepository<B> {
  backend: Arc<B>,
}

impl<B: Backend> ProfileRepository<B> {
  pub fn new(backend: Arc<B>) -> Self {
    Self { backend }
  }

  pub async fn load(&self, user: Option<&User>) -> Option<Profile> {
    let user = user?;
    logged(self.try_load(user).await, "load profile", TABLE).flatten()
  }

  /// Update the user's profile if one exists, otherwise create it.
  ///
  /// Lookup is by owner, so any id on `profile` is ignored.
  pub async fn save(&self, user: Option<&User>, profile: &Profile) -> Option<Profile> {
    let user = user?;
    logged(self.try_save(user, profile).await, "save profile", TABLE)
  }

  async fn try_load(&self, user: &User) -> Result<Option<Profile>> {
    let rows = self
      .backend
      .select(TABLE, &Select::all(owned_by(user)))
      .await?;
    if rows.is_empty() {
      return Ok(None);
    }
    decode(TABLE, single(rows)?).map(Some)
  }

  async fn try_save(&self, user: &User, profile: &Profile) -> Result<Profile> {
    let existing = self
      .backend
      .select(TABLE, &Select::columns("id", owned_by(user)))
      .await?;
    let payload = write_payload(profile, user)?;

    let stored: Value = if existing.is_empty() {
      single(self.backend.insert(TABLE, &[payload]).await?)?
    } else {
      single(
        self
          .backend
          .update(TABLE, &owned_by(user), &payload)
          .await?,
      )?
    };

    decode(TABLE, stored)
  }
}
