use crate::backend::{single, Backend, Select, User};
use crate::repo::{decode, decode_all, logged, owned_by, owned_row, upsert, Record, RowId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Repository for a plain multi-row owned table (clients, services).
pub struct TableRepository<B, T> {
  backend: Arc<B>,
  _record: PhantomData<fn() -> T>,
}

impl<B: Backend, T: Record> TableRepository<B, T> {
  pub fn new(backend: Arc<B>) -> Self {
    Self {
      backend,
      _record: PhantomData,
    }
  }

  /// All of the user's rows in natural order.
  pub async fn load_all(&self, user: Option<&User>) -> Vec<T> {
    let Some(user) = user else {
      return Vec::new();
    };

    let select = Select::all(owned_by(user)).order(T::ORDER);
    let result = self
      .backend
      .select(T::TABLE, &select)
      .await
      .map(|rows| decode_all(T::TABLE, rows));

    logged(result, "load rows", T::TABLE).unwrap_or_default()
  }

  pub async fn save(&self, user: Option<&User>, row: &T) -> Option<T> {
    let user = user?;
    logged(upsert(&*self.backend, user, row).await, "save row", T::TABLE)
  }

  pub async fn get(&self, user: Option<&User>, id: &RowId) -> Option<T> {
    let user = user?;

    let select = Select::all(owned_row(user, id));
    let result = async {
      let rows = self.backend.select(T::TABLE, &select).await?;
      decode(T::TABLE, single(rows)?)
    }
    .await;

    logged(result, "get row", T::TABLE)
  }
}
