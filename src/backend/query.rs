//! Query building for the table storage API.
//!
//! Filters are equality-only and ordering is a single column, which is all the
//! repositories need. Everything renders to PostgREST query parameters.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// Equality filter over one or more columns (AND-ed together).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
  conditions: Vec<(&'static str, String)>,
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a `column = value` condition.
  pub fn eq(mut self, column: &'static str, value: impl fmt::Display) -> Self {
    self.conditions.push((column, value.to_string()));
    self
  }

  pub fn conditions(&self) -> &[(&'static str, String)] {
    &self.conditions
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }

  /// Render as `column=eq.value` pairs.
  pub fn to_params(&self) -> Vec<(String, String)> {
    self
      .conditions
      .iter()
      .map(|(column, value)| (column.to_string(), format!("eq.{}", value)))
      .collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
  pub column: &'static str,
  pub ascending: bool,
}

impl Order {
  pub const fn asc(column: &'static str) -> Self {
    Self {
      column,
      ascending: true,
    }
  }

  pub const fn desc(column: &'static str) -> Self {
    Self {
      column,
      ascending: false,
    }
  }

  fn to_param(self) -> String {
    let direction = if self.ascending { "asc" } else { "desc" };
    format!("{}.{}", self.column, direction)
  }
}

/// A select: column list (possibly with embedded joins), filter and order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
  pub columns: &'static str,
  pub filter: Filter,
  pub order: Option<Order>,
}

impl Select {
  pub fn all(filter: Filter) -> Self {
    Self::columns("*", filter)
  }

  pub fn columns(columns: &'static str, filter: Filter) -> Self {
    Self {
      columns,
      filter,
      order: None,
    }
  }

  pub fn order(mut self, order: Order) -> Self {
    self.order = Some(order);
    self
  }

  pub fn to_params(&self) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), compact_columns(self.columns))];
    params.extend(self.filter.to_params());
    if let Some(order) = self.order {
      params.push(("order".to_string(), order.to_param()));
    }
    params
  }
}

/// Strip whitespace from a column list so multi-line join specs stay valid.
fn compact_columns(columns: &str) -> String {
  columns.split_whitespace().collect()
}

/// Expect exactly one row, mirroring the API's single-object mode.
pub fn single<T>(rows: Vec<T>) -> Result<T> {
  let count = rows.len();
  let mut rows = rows.into_iter();
  match (rows.next(), count) {
    (Some(row), 1) => Ok(row),
    (None, _) => Err(eyre!("Expected a single row, got none")),
    (_, n) => Err(eyre!("Expected a single row, got {}", n)),
  }
}
