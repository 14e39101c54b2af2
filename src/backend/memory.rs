//! In-memory backend used by tests.
//!
//! Tables are plain JSON rows with integer ids assigned on insert. Only the
//! subset of the remote behaviour the repositories rely on is modelled.

use crate::backend::{Backend, Filter, Select, Session, User};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
  session: Option<Session>,
  tables: BTreeMap<String, Vec<Value>>,
  next_id: i64,
  failing_inserts: HashSet<String>,
  failing_deletes: HashSet<String>,
  failing_sign_out: bool,
  calls: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBackend {
  state: Mutex<State>,
}

pub fn user(id: &str) -> User {
  User {
    id: id.to_string(),
    email: Some(format!("{}@example.com", id)),
    created_at: None,
  }
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// A backend with a live session for `user_id`.
  pub fn signed_in(user_id: &str) -> Self {
    let backend = Self::new();
    backend.lock().session = Some(Session {
      access_token: format!("token-{}", user_id),
      refresh_token: "refresh".to_string(),
      token_type: Some("bearer".to_string()),
      expires_in: None,
      expires_at: None,
      user: user(user_id),
    });
    backend
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  pub fn fail_inserts_into(&self, table: &str) {
    self.lock().failing_inserts.insert(table.to_string());
  }

  pub fn fail_deletes_from(&self, table: &str) {
    self.lock().failing_deletes.insert(table.to_string());
  }

  pub fn fail_sign_out(&self) {
    self.lock().failing_sign_out = true;
  }

  pub fn has_session(&self) -> bool {
    self.lock().session.is_some()
  }

  /// Every remote call made so far, as `operation:target`.
  pub fn calls(&self) -> Vec<String> {
    self.lock().calls.clone()
  }

  pub fn rows(&self, table: &str) -> Vec<Value> {
    self.lock().tables.get(table).cloned().unwrap_or_default()
  }

  /// Seed a row directly, bypassing ownership stamping.
  pub fn seed(&self, table: &str, row: Value) -> Value {
    let mut state = self.lock();
    let row = assign_id(&mut state, row);
    state
      .tables
      .entry(table.to_string())
      .or_default()
      .push(row.clone());
    row
  }
}

fn assign_id(state: &mut State, mut row: Value) -> Value {
  if let Some(object) = row.as_object_mut() {
    if !object.contains_key("id") {
      state.next_id += 1;
      object.insert("id".to_string(), json!(state.next_id));
    }
  }
  row
}

fn render(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn matches(row: &Value, filter: &Filter) -> bool {
  filter.conditions().iter().all(|(column, expected)| {
    row
      .get(*column)
      .map(|v| render(v) == *expected)
      .unwrap_or(false)
  })
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::Number(x)), Some(Value::Number(y))) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    (Some(x), Some(y)) => render(x).cmp(&render(y)),
    (None, Some(_)) => Ordering::Less,
    (Some(_), None) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

impl Backend for MemoryBackend {
  async fn session(&self) -> Result<Option<Session>> {
    let mut state = self.lock();
    state.calls.push("session".to_string());
    Ok(state.session.clone())
  }

  async fn user(&self) -> Result<Option<User>> {
    let mut state = self.lock();
    state.calls.push("user".to_string());
    Ok(state.session.as_ref().map(|s| s.user.clone()))
  }

  async fn sign_in(&self, email: &str, _password: &str) -> Result<Session> {
    let user_id = email.split('@').next().unwrap_or(email);
    let session = Session {
      access_token: format!("token-{}", user_id),
      refresh_token: "refresh".to_string(),
      token_type: None,
      expires_in: None,
      expires_at: None,
      user: user(user_id),
    };
    self.lock().session = Some(session.clone());
    Ok(session)
  }

  async fn sign_out(&self) -> Result<()> {
    let mut state = self.lock();
    state.calls.push("sign_out".to_string());
    if state.failing_sign_out {
      return Err(eyre!("sign out failed (503): unavailable"));
    }
    state.session = None;
    Ok(())
  }

  async fn select(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
    let mut state = self.lock();
    state.calls.push(format!("select:{}", table));

    let mut rows: Vec<Value> = state
      .tables
      .get(table)
      .map(|rows| {
        rows
          .iter()
          .filter(|r| matches(r, &select.filter))
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    if let Some(order) = select.order {
      rows.sort_by(|a, b| {
        let ord = compare(a.get(order.column), b.get(order.column));
        if order.ascending {
          ord
        } else {
          ord.reverse()
        }
      });
    }

    // Embedded join of the owning client, as the REST API does for `clientes(...)`.
    if select.columns.contains("clientes") {
      let clients = state.tables.get("clientes").cloned().unwrap_or_default();
      for row in &mut rows {
        let client = row
          .get("cliente_id")
          .and_then(|id| clients.iter().find(|c| c.get("id") == Some(id)))
          .cloned()
          .unwrap_or(Value::Null);
        if let Some(object) = row.as_object_mut() {
          object.insert("clientes".to_string(), client);
        }
      }
    }

    Ok(rows)
  }

  async fn insert(&self, table: &str, rows: &[Value]) -> Result<Vec<Value>> {
    let mut state = self.lock();
    state.calls.push(format!("insert:{}", table));
    if state.failing_inserts.contains(table) {
      return Err(eyre!("{} failed (400): insert rejected", table));
    }

    let stored: Vec<Value> = rows
      .iter()
      .cloned()
      .map(|row| assign_id(&mut state, row))
      .collect();
    state
      .tables
      .entry(table.to_string())
      .or_default()
      .extend(stored.iter().cloned());
    Ok(stored)
  }

  async fn update(&self, table: &str, filter: &Filter, patch: &Value) -> Result<Vec<Value>> {
    let mut state = self.lock();
    state.calls.push(format!("update:{}", table));

    let patch: Map<String, Value> = patch.as_object().cloned().unwrap_or_default();
    let mut updated = Vec::new();
    if let Some(rows) = state.tables.get_mut(table) {
      for row in rows.iter_mut().filter(|r| matches(r, filter)) {
        if let Some(object) = row.as_object_mut() {
          for (k, v) in &patch {
            object.insert(k.clone(), v.clone());
          }
        }
        updated.push(row.clone());
      }
    }
    Ok(updated)
  }

  async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
    let mut state = self.lock();
    state.calls.push(format!("delete:{}", table));
    if state.failing_deletes.contains(table) {
      return Err(eyre!("{} failed (403): delete rejected", table));
    }
    if let Some(rows) = state.tables.get_mut(table) {
      rows.retain(|r| !matches(r, filter));
    }
    Ok(())
  }

  async fn rpc(&self, function: &str, params: &Value) -> Result<Value> {
    let mut state = self.lock();
    state.calls.push(format!("rpc:{}", function));

    let owner = params.get("p_user_id").map(render).unwrap_or_default();
    let count = |table: &str| {
      state
        .tables
        .get(table)
        .map(|rows| {
          rows
            .iter()
            .filter(|r| r.get("user_id").map(render).as_deref() == Some(owner.as_str()))
            .count()
        })
        .unwrap_or(0)
    };
    Ok(json!({
      "total_clientes": count("clientes"),
      "total_orcamentos": count("orcamentos"),
    }))
  }
}
