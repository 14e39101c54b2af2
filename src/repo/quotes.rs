use crate::backend::{single, Backend, Filter, Order, Select, User};
use crate::repo::{
  decode, decode_all, logged, owned_by, owned_row, upsert, Quote, QuoteItem, QuoteWithItems,
  Record, RowId,
};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

const ITEMS_TABLE: &str = "orcamentos_itens";
const ITEM_QUOTE_COLUMN: &str = "orcamento_id";

/// Quote columns plus the embedded client.
const QUOTE_COLUMNS: &str = "
  *,
  clientes (
    id,
    nome,
    tel,
    endereco
  )
";

/// Quotes and their line items.
pub struct QuoteRepository<B> {
  backend: Arc<B>,
}

impl<B: Backend> QuoteRepository<B> {
  pub fn new(backend: Arc<B>) -> Self {
    Self { backend }
  }

  /// The user's quotes, newest first, each with its client.
  pub async fn load_all(&self, user: Option<&User>) -> Vec<Quote> {
    let Some(user) = user else {
      return Vec::new();
    };

    let select = Select::columns(QUOTE_COLUMNS, owned_by(user)).order(Quote::ORDER);
    let result = self
      .backend
      .select(Quote::TABLE, &select)
      .await
      .map(|rows| decode_all(Quote::TABLE, rows));

    logged(result, "load quotes", Quote::TABLE).unwrap_or_default()
  }

  /// One quote with its client and items (items in insertion order).
  pub async fn get(&self, user: Option<&User>, id: &RowId) -> Option<QuoteWithItems> {
    let user = user?;
    logged(self.try_get(user, id).await, "get quote", Quote::TABLE)
  }

  /// Save a quote and replace its whole item set.
  ///
  /// The quote is written first, then the old items are deleted and the new
  /// ones inserted. There is no transaction: if a newly created quote cannot
  /// get its items, the quote is deleted again; an existing quote is left
  /// with whatever the failed step produced.
  pub async fn save(&self, user: Option<&User>, quote: &Quote, items: &[QuoteItem]) -> Option<Quote> {
    let user = user?;
    logged(self.try_save(user, quote, items).await, "save quote", Quote::TABLE)
  }

  pub async fn update_status(&self, user: Option<&User>, id: &RowId, status: &str) -> Option<Quote> {
    let user = user?;

    let result = async {
      let rows = self
        .backend
        .update(Quote::TABLE, &owned_row(user, id), &json!({ "status": status }))
        .await?;
      decode(Quote::TABLE, single(rows)?)
    }
    .await;

    logged(result, "update quote status", Quote::TABLE)
  }

  async fn try_get(&self, user: &User, id: &RowId) -> Result<QuoteWithItems> {
    let rows = self
      .backend
      .select(
        Quote::TABLE,
        &Select::columns(QUOTE_COLUMNS, owned_row(user, id)),
      )
      .await?;
    let quote: Quote = decode(Quote::TABLE, single(rows)?)?;

    let items = self
      .backend
      .select(
        ITEMS_TABLE,
        &Select::all(Filter::new().eq(ITEM_QUOTE_COLUMN, id)).order(Order::asc("id")),
      )
      .await?;

    Ok(QuoteWithItems {
      quote,
      items: decode_all(ITEMS_TABLE, items),
    })
  }

  async fn try_save(&self, user: &User, quote: &Quote, items: &[QuoteItem]) -> Result<Quote> {
    let created = quote.id.is_none();
    let saved = upsert(&*self.backend, user, quote).await?;
    let id = saved
      .id
      .clone()
      .ok_or_else(|| eyre!("Saved quote has no id"))?;

    if let Err(e) = self.replace_items(&id, items).await {
      if created {
        self.discard(user, &id).await;
      } else {
        warn!(quote = %id, "Quote updated but its items could not be replaced");
      }
      return Err(e);
    }

    Ok(saved)
  }

  async fn replace_items(&self, quote_id: &RowId, items: &[QuoteItem]) -> Result<()> {
    self
      .backend
      .delete(ITEMS_TABLE, &Filter::new().eq(ITEM_QUOTE_COLUMN, quote_id))
      .await?;

    if items.is_empty() {
      return Ok(());
    }

    let rows = items
      .iter()
      .map(|item| item_payload(item, quote_id))
      .collect::<Result<Vec<Value>>>()?;
    self.backend.insert(ITEMS_TABLE, &rows).await?;
    Ok(())
  }

  /// Compensate for a half-saved new quote.
  async fn discard(&self, user: &User, id: &RowId) {
    let filter = owned_row(user, id);
    if let Err(e) = self.backend.delete(Quote::TABLE, &filter).await {
      error!(quote = %id, error = %e, "Failed to remove quote after item failure");
    }
  }
}

/// An item row bound to `quote_id`, without its previous identity.
fn item_payload(item: &QuoteItem, quote_id: &RowId) -> Result<Value> {
  let row = QuoteItem {
    id: None,
    quote_id: Some(quote_id.clone()),
    ..item.clone()
  };
  serde_json::to_value(row).map_err(|e| eyre!("Failed to serialize quote item: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::{user, MemoryBackend};

  fn item(service: i64, amount: f64) -> QuoteItem {
    let mut item = QuoteItem {
      service_id: Some(RowId::Int(service)),
      ..Default::default()
    };
    item.extra.insert("valor".to_string(), json!(amount));
    item
  }

  fn quote(date: &str) -> Quote {
    Quote {
      date: Some(date.to_string()),
      status: Some("pendente".to_string()),
      ..Default::default()
    }
  }

  fn amounts(items: &[QuoteItem]) -> Vec<Value> {
    items.iter().map(|i| i.extra["valor"].clone()).collect()
  }

  #[tokio::test]
  async fn test_save_then_get_returns_all_items() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = QuoteRepository::new(backend);
    let ana = user("ana");
    let items = vec![item(1, 10.0), item(2, 20.0), item(3, 30.0)];

    let saved = repo
      .save(Some(&ana), &quote("2024-05-01"), &items)
      .await
      .unwrap();
    let loaded = repo
      .get(Some(&ana), saved.id.as_ref().unwrap())
      .await
      .unwrap();

    assert_eq!(loaded.items.len(), 3);
    assert_eq!(amounts(&loaded.items), vec![json!(10.0), json!(20.0), json!(30.0)]);
    assert!(loaded
      .items
      .iter()
      .all(|i| i.quote_id == saved.id && i.id.is_some()));
  }

  #[tokio::test]
  async fn test_second_save_replaces_items() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = QuoteRepository::new(backend.clone());
    let ana = user("ana");

    let saved = repo
      .save(Some(&ana), &quote("2024-05-01"), &[item(1, 10.0), item(2, 20.0)])
      .await
      .unwrap();
    let resaved = repo
      .save(Some(&ana), &saved, &[item(3, 99.0)])
      .await
      .unwrap();
    assert_eq!(resaved.id, saved.id);

    let loaded = repo
      .get(Some(&ana), saved.id.as_ref().unwrap())
      .await
      .unwrap();
    assert_eq!(amounts(&loaded.items), vec![json!(99.0)]);
    assert_eq!(backend.rows(ITEMS_TABLE).len(), 1);
  }

  #[tokio::test]
  async fn test_failed_items_remove_new_quote() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_inserts_into(ITEMS_TABLE);
    let repo = QuoteRepository::new(backend.clone());

    let saved = repo
      .save(Some(&user("ana")), &quote("2024-05-01"), &[item(1, 10.0)])
      .await;

    assert!(saved.is_none());
    assert!(backend.rows(Quote::TABLE).is_empty());
  }

  #[tokio::test]
  async fn test_failed_items_keep_existing_quote() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = QuoteRepository::new(backend.clone());
    let ana = user("ana");
    let saved = repo
      .save(Some(&ana), &quote("2024-05-01"), &[item(1, 10.0)])
      .await
      .unwrap();

    backend.fail_deletes_from(ITEMS_TABLE);
    assert!(repo.save(Some(&ana), &saved, &[item(2, 5.0)]).await.is_none());

    assert_eq!(backend.rows(Quote::TABLE).len(), 1);
    assert_eq!(backend.rows(ITEMS_TABLE).len(), 1);
  }

  #[tokio::test]
  async fn test_load_all_newest_first_with_client() {
    let backend = Arc::new(MemoryBackend::new());
    let client = backend.seed("clientes", json!({ "user_id": "ana", "nome": "Alice" }));
    backend.seed(
      "orcamentos",
      json!({ "user_id": "ana", "data": "2024-01-10", "cliente_id": client["id"] }),
    );
    backend.seed(
      "orcamentos",
      json!({ "user_id": "ana", "data": "2024-03-02", "cliente_id": client["id"] }),
    );
    backend.seed("orcamentos", json!({ "user_id": "bia", "data": "2024-04-01" }));
    let repo = QuoteRepository::new(backend);

    let quotes = repo.load_all(Some(&user("ana"))).await;

    let dates: Vec<_> = quotes.iter().map(|q| q.date.clone().unwrap()).collect();
    assert_eq!(dates, vec!["2024-03-02", "2024-01-10"]);
    assert!(quotes
      .iter()
      .all(|q| q.client.as_ref().map(|c| c.name.as_str()) == Some("Alice")));
  }

  #[tokio::test]
  async fn test_listing_output_carries_client() {
    let backend = Arc::new(MemoryBackend::new());
    let client = backend.seed("clientes", json!({ "user_id": "ana", "nome": "Alice" }));
    backend.seed(
      "orcamentos",
      json!({ "user_id": "ana", "data": "2024-01-10", "cliente_id": client["id"] }),
    );
    let repo = QuoteRepository::new(backend);

    let out = serde_json::to_value(repo.load_all(Some(&user("ana"))).await).unwrap();

    assert_eq!(out[0]["clientes"]["nome"], "Alice");
    assert_eq!(out[0]["clientes"]["id"], client["id"]);
  }

  #[tokio::test]
  async fn test_resaving_loaded_quote_does_not_write_join() {
    let backend = Arc::new(MemoryBackend::new());
    let client = backend.seed("clientes", json!({ "user_id": "ana", "nome": "Alice" }));
    let repo = QuoteRepository::new(backend.clone());
    let ana = user("ana");
    let mut draft = quote("2024-05-01");
    draft.client_id = Some(serde_json::from_value(client["id"].clone()).unwrap());
    let saved = repo.save(Some(&ana), &draft, &[]).await.unwrap();

    let loaded = repo
      .get(Some(&ana), saved.id.as_ref().unwrap())
      .await
      .unwrap();
    assert!(loaded.quote.client.is_some());
    repo.save(Some(&ana), &loaded.quote, &[]).await.unwrap();

    assert!(backend.rows(Quote::TABLE)[0].get("clientes").is_none());
  }

  #[tokio::test]
  async fn test_update_status_is_owner_scoped() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = QuoteRepository::new(backend.clone());
    let saved = repo
      .save(Some(&user("ana")), &quote("2024-05-01"), &[])
      .await
      .unwrap();
    let id = saved.id.unwrap();

    let updated = repo
      .update_status(Some(&user("ana")), &id, "aprovado")
      .await
      .unwrap();
    assert_eq!(updated.status.as_deref(), Some("aprovado"));

    assert!(repo
      .update_status(Some(&user("bia")), &id, "recusado")
      .await
      .is_none());
    assert_eq!(backend.rows(Quote::TABLE)[0]["status"], "aprovado");
  }

  #[tokio::test]
  async fn test_unauthenticated_quote_calls_are_empty() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = QuoteRepository::new(backend.clone());

    assert!(repo.load_all(None).await.is_empty());
    assert!(repo.get(None, &RowId::Int(1)).await.is_none());
    assert!(repo.save(None, &quote("2024-05-01"), &[]).await.is_none());
    assert!(repo.update_status(None, &RowId::Int(1), "x").await.is_none());
    assert!(backend.calls().is_empty());
  }
}
