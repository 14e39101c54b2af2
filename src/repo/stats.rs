use crate::backend::{Backend, User};
use crate::repo::logged;
use serde_json::{json, Value};
use std::sync::Arc;

const DASHBOARD_STATS: &str = "get_dashboard_stats";

/// Aggregates computed server-side.
pub struct StatsRepository<B> {
  backend: Arc<B>,
}

impl<B: Backend> StatsRepository<B> {
  pub fn new(backend: Arc<B>) -> Self {
    Self { backend }
  }

  /// Dashboard figures for the user, passed through as the server shaped them.
  pub async fn dashboard(&self, user: Option<&User>) -> Option<Value> {
    let user = user?;
    let params = json!({ "p_user_id": user.id });
    logged(
      self.backend.rpc(DASHBOARD_STATS, &params).await,
      "load dashboard stats",
      DASHBOARD_STATS,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::{user, MemoryBackend};

  #[tokio::test]
  async fn test_dashboard_passes_user_to_rpc() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed("clientes", json!({ "user_id": "ana", "nome": "Alice" }));
    backend.seed("clientes", json!({ "user_id": "bia", "nome": "Bruno" }));
    let repo = StatsRepository::new(backend.clone());

    let stats = repo.dashboard(Some(&user("ana"))).await.unwrap();

    assert_eq!(stats["total_clientes"], 1);
    assert_eq!(backend.calls(), vec!["rpc:get_dashboard_stats"]);
  }

  #[tokio::test]
  async fn test_dashboard_without_user_is_none() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = StatsRepository::new(backend.clone());

    assert!(repo.dashboard(None).await.is_none());
    assert!(backend.calls().is_empty());
  }
}
