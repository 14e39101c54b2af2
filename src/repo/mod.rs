//! Entity repositories over the remote tables.
//!
//! Every operation takes the already-resolved user. A missing user, a remote
//! error or a malformed row all end the same way: the failure is logged and
//! the caller gets `None` or an empty list.

mod models;
mod profile;
mod quotes;
mod stats;
mod table;

use crate::backend::{single, Backend, Filter, Order, User};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

pub use models::{Client, Profile, Quote, QuoteItem, QuoteWithItems, RowId, Service};
pub use profile::ProfileRepository;
pub use quotes::QuoteRepository;
pub use stats::StatsRepository;
pub use table::TableRepository;

pub type ClientRepository<B> = TableRepository<B, Client>;
pub type ServiceRepository<B> = TableRepository<B, Service>;

/// Column every owned table is filtered on.
pub const OWNER_COLUMN: &str = "user_id";

/// Relations embedded by selects; they are not columns of the written table.
const EMBEDDED_COLUMNS: &[&str] = &["clientes"];

/// A row type stored in an owner-scoped table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
  const TABLE: &'static str;
  /// Natural listing order.
  const ORDER: Order;

  fn id(&self) -> Option<&RowId>;
}

impl Record for Client {
  const TABLE: &'static str = "clientes";
  const ORDER: Order = Order::asc("nome");

  fn id(&self) -> Option<&RowId> {
    self.id.as_ref()
  }
}

impl Record for Service {
  const TABLE: &'static str = "servicos";
  const ORDER: Order = Order::asc("nome");

  fn id(&self) -> Option<&RowId> {
    self.id.as_ref()
  }
}

impl Record for Quote {
  const TABLE: &'static str = "orcamentos";
  const ORDER: Order = Order::desc("data");

  fn id(&self) -> Option<&RowId> {
    self.id.as_ref()
  }
}

/// All repositories, sharing one backend client.
pub struct Repositories<B> {
  pub profile: ProfileRepository<B>,
  pub clients: ClientRepository<B>,
  pub services: ServiceRepository<B>,
  pub quotes: QuoteRepository<B>,
  pub stats: StatsRepository<B>,
}

impl<B: Backend> Repositories<B> {
  pub fn new(backend: Arc<B>) -> Self {
    Self {
      profile: ProfileRepository::new(backend.clone()),
      clients: TableRepository::new(backend.clone()),
      services: TableRepository::new(backend.clone()),
      quotes: QuoteRepository::new(backend.clone()),
      stats: StatsRepository::new(backend),
    }
  }
}

/// Filter on the owner column.
pub(crate) fn owned_by(user: &User) -> Filter {
  Filter::new().eq(OWNER_COLUMN, &user.id)
}

/// Filter on a row id within the owner's rows.
pub(crate) fn owned_row(user: &User, id: &RowId) -> Filter {
  Filter::new().eq("id", id).eq(OWNER_COLUMN, &user.id)
}

pub(crate) fn decode<T: DeserializeOwned>(table: &str, row: Value) -> Result<T> {
  serde_json::from_value(row).map_err(|e| eyre!("Failed to parse {} row: {}", table, e))
}

/// Decode a listing row by row. Rows that do not fit the model are logged
/// and skipped; the rest are kept.
pub(crate) fn decode_all<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|row| {
      let id = row.get("id").cloned().unwrap_or(Value::Null);
      match decode(table, row) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
          error!(table, id = %id, error = %e, "Skipping malformed row");
          None
        }
      }
    })
    .collect()
}

/// Serialize a row for writing: owner stamped, id left to the filter,
/// embedded relations dropped.
pub(crate) fn write_payload<T: Serialize>(row: &T, user: &User) -> Result<Value> {
  let mut payload =
    serde_json::to_value(row).map_err(|e| eyre!("Failed to serialize row: {}", e))?;
  let object = payload
    .as_object_mut()
    .ok_or_else(|| eyre!("Row did not serialize to an object"))?;
  object.remove("id");
  for column in EMBEDDED_COLUMNS {
    object.remove(*column);
  }
  object.insert(OWNER_COLUMN.to_string(), Value::String(user.id.clone()));
  Ok(payload)
}

/// Insert when the row has no id, otherwise update it in place within the
/// owner's rows. An id belonging to someone else matches nothing and fails.
pub(crate) async fn upsert<B: Backend, T: Record>(backend: &B, user: &User, row: &T) -> Result<T> {
  let payload = write_payload(row, user)?;

  let stored = match row.id() {
    Some(id) => {
      let rows = backend
        .update(T::TABLE, &owned_row(user, id), &payload)
        .await?;
      single(rows).map_err(|e| eyre!("Update of {} {} matched no owned row: {}", T::TABLE, id, e))?
    }
    None => single(backend.insert(T::TABLE, &[payload]).await?)?,
  };

  decode(T::TABLE, stored)
}

/// Log a failed operation and discard the error.
pub(crate) fn logged<T>(result: Result<T>, action: &str, table: &str) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      error!(table, error = %e, "Failed to {}", action);
      None
    }
  }
}
