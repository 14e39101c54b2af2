//! Versioned response cache: named generations of URL → response entries.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::fetch::{Response, ResponseSource};

/// Metadata about one cached entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub url: String,
  pub status: u16,
  pub size: usize,
  /// SHA-256 of the body, hex encoded
  pub digest: String,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all caches, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and everything in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Find a response for `url` in any cache, oldest cache first.
  fn lookup(&self, url: &str) -> Result<Option<Response>>;

  /// Store one response, creating the cache if needed.
  fn put(&self, name: &str, url: &str, response: &Response) -> Result<()>;

  /// Store a batch of responses atomically: all of them or none.
  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()>;

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by request URL
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(url);
"#;

impl SqliteCacheStore {
  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
  Ok(())
}

fn store_entry(conn: &Connection, name: &str, url: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, url, status, headers, body, digest, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        url,
        response.status,
        headers,
        response.body,
        digest(&response.body)
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", url, name, e))?;
  Ok(())
}

fn digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

impl CacheStore for SqliteCacheStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
    Ok(removed > 0)
  }

  fn lookup(&self, url: &str) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT e.status, e.headers, e.body FROM cache_entries e
         INNER JOIN caches c ON c.name = e.cache_name
         WHERE e.url = ?
         ORDER BY c.rowid
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![url], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))?;

    match row {
      Some((status, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse cached headers for {}: {}", url, e))?;
        Ok(Some(Response {
          status,
          headers,
          body,
          source: ResponseSource::Cache,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, url: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    ensure_cache(&conn, name)?;
    store_entry(&conn, name, url, response)
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, name)?;
    for (url, response) in entries {
      store_entry(&tx, name, url, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, length(body), digest, cached_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(url, status, size, digest, cached_at)| {
        Ok(EntryInfo {
          url,
          status,
          size: usize::try_from(size).unwrap_or_default(),
          digest,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
