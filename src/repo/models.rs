//! Row types for the business tables.
//!
//! Column names follow the backend schema. Columns this crate does not
//! interpret are kept in `extra` so a load/edit/save cycle never drops data.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Row identifier; the backend uses integer keys but uuids are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
  Int(i64),
  Text(String),
}

impl fmt::Display for RowId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RowId::Int(id) => write!(f, "{}", id),
      RowId::Text(id) => f.write_str(id),
    }
  }
}

impl From<&str> for RowId {
  /// Numeric strings become integer ids.
  fn from(raw: &str) -> Self {
    raw
      .parse::<i64>()
      .map(RowId::Int)
      .unwrap_or_else(|_| RowId::Text(raw.to_string()))
  }
}

/// Read an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RowId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RowId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(rename = "nome", default, deserialize_with = "null_as_default")]
  pub name: String,
  #[serde(rename = "tel", default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(rename = "endereco", default, skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RowId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(rename = "nome", default, deserialize_with = "null_as_default")]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Client columns embedded in quote listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
  pub id: RowId,
  #[serde(rename = "nome", default, deserialize_with = "null_as_default")]
  pub name: String,
  #[serde(rename = "tel", default)]
  pub phone: Option<String>,
  #[serde(rename = "endereco", default)]
  pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RowId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(rename = "cliente_id", default, skip_serializing_if = "Option::is_none")]
  pub client_id: Option<RowId>,
  #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
  pub date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  /// Joined client; stripped from write payloads.
  #[serde(rename = "clientes", default, skip_serializing_if = "Option::is_none")]
  pub client: Option<ClientSummary>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<RowId>,
  #[serde(rename = "orcamento_id", default, skip_serializing_if = "Option::is_none")]
  pub quote_id: Option<RowId>,
  #[serde(rename = "servico_id", default, skip_serializing_if = "Option::is_none")]
  pub service_id: Option<RowId>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A quote together with its items, as returned by a single-quote lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteWithItems {
  #[serde(flatten)]
  pub quote: Quote,
  #[serde(rename = "itens", default)]
  pub items: Vec<QuoteItem>,
}
