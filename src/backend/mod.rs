//! Remote data client boundary.
//!
//! The hosted backend provides auth, row-level-secured tables and one
//! aggregate RPC. `Backend` captures that contract so the guard and the
//! repositories can run against `SupabaseClient` or an in-memory fake.

mod client;
#[cfg(test)]
pub mod memory;
mod query;
mod session;

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;

pub use client::SupabaseClient;
pub use query::{single, Filter, Order, Select};
pub use session::{Session, SessionStore, User};

pub trait Backend: Send + Sync {
  /// The locally held session, refreshed first if it has expired.
  fn session(&self) -> impl Future<Output = Result<Option<Session>>> + Send;

  /// The user behind the current token, as verified by the auth server.
  fn user(&self) -> impl Future<Output = Result<Option<User>>> + Send;

  fn sign_in(&self, email: &str, password: &str)
    -> impl Future<Output = Result<Session>> + Send;

  /// Invalidate the remote session. Local state is cleared only on success.
  fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

  fn select(&self, table: &str, select: &Select)
    -> impl Future<Output = Result<Vec<Value>>> + Send;

  /// Insert rows, returning them as stored.
  fn insert(&self, table: &str, rows: &[Value]) -> impl Future<Output = Result<Vec<Value>>> + Send;

  /// Patch every row matching `filter`, returning the updated rows.
  fn update(
    &self,
    table: &str,
    filter: &Filter,
    patch: &Value,
  ) -> impl Future<Output = Result<Vec<Value>>> + Send;

  fn delete(&self, table: &str, filter: &Filter) -> impl Future<Output = Result<()>> + Send;

  fn rpc(&self, function: &str, params: &Value) -> impl Future<Output = Result<Value>> + Send;
}
