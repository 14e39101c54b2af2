//! Offline cache worker.
//!
//! Sits between the app and the network, the way a browser service worker
//! does. Three lifecycle events drive it:
//! - install: pre-cache the asset manifest into the current cache generation
//! - activate: sweep every other generation
//! - fetch: route each request to the network, network-first or cache-first
//!
//! Only 2xx responses are ever written to the cache.

mod cache;
mod fetch;

use crate::config::WorkerConfig;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use reqwest::Method;
use tracing::{debug, info, warn};
use url::Url;

pub use cache::{CacheStore, SqliteCacheStore};
pub use fetch::{Destination, Fetcher, HttpFetcher, Request, Response, ResponseSource};

/// Worker settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  /// Origin the app is served from
  pub origin: Url,
  pub cache_name: String,
  pub assets: Vec<Url>,
  pub backend_marker: String,
  pub offline_page: Url,
}

impl WorkerSettings {
  /// Resolve relative asset paths against the configured origin.
  pub fn from_config(config: &WorkerConfig) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid worker origin {}: {}", config.origin, e))?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid asset URL {}: {}", path, e))
    };

    Ok(Self {
      origin: origin.clone(),
      cache_name: config.cache_version.clone(),
      assets: config
        .assets
        .iter()
        .map(|a| resolve(a))
        .collect::<Result<_>>()?,
      backend_marker: config.backend_marker.clone(),
      offline_page: resolve(&config.offline_page)?,
    })
  }
}

/// Lifecycle position of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installed,
  Activated,
}

/// Outcome of pre-caching on install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precache {
  /// Every manifest asset was stored
  Complete(usize),
  /// Some asset failed; nothing was stored
  Abandoned,
}

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  NetworkOnly,
  NetworkFirst,
  CacheFirst,
}

pub struct OfflineWorker<F, S> {
  fetcher: F,
  store: S,
  settings: WorkerSettings,
  state: WorkerState,
  skip_waiting: bool,
  clients_claimed: bool,
}

impl<F: Fetcher, S: CacheStore> OfflineWorker<F, S> {
  pub fn new(fetcher: F, store: S, settings: WorkerSettings) -> Self {
    Self {
      fetcher,
      store,
      settings,
      state: WorkerState::Parsed,
      skip_waiting: false,
      clients_claimed: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Whether the worker asked to replace the previous one without waiting.
  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting
  }

  /// Whether open clients were taken over on activation.
  pub fn has_claimed_clients(&self) -> bool {
    self.clients_claimed
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  /// Pre-cache the asset manifest, all or nothing.
  ///
  /// A failed asset abandons the whole batch; installation still completes
  /// and the worker always skips waiting.
  pub async fn install(&mut self) -> Precache {
    info!(cache = %self.settings.cache_name, "Installing");

    let outcome = match self.precache().await {
      Ok(count) => {
        info!(count, "Cached manifest assets");
        Precache::Complete(count)
      }
      Err(e) => {
        warn!(error = %e, "Pre-caching abandoned");
        Precache::Abandoned
      }
    };

    self.state = WorkerState::Installed;
    self.skip_waiting = true;
    outcome
  }

  async fn precache(&self) -> Result<usize> {
    self.store.open(&self.settings.cache_name)?;

    let fetches = self.settings.assets.iter().map(|url| self.fetch_asset(url));
    let entries = try_join_all(fetches).await?;

    self.store.put_all(&self.settings.cache_name, &entries)?;
    Ok(entries.len())
  }

  /// Fetch one manifest asset; anything but a 2xx fails the batch.
  async fn fetch_asset(&self, url: &Url) -> Result<(String, Response)> {
    let request = Request::get(url.clone(), Destination::infer(url));
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("{} returned {}", url, response.status));
    }
    Ok((url.to_string(), response))
  }

  /// Delete every cache generation except the current one, then claim clients.
  ///
  /// Returns the names of the deleted generations.
  pub async fn activate(&mut self) -> Result<Vec<String>> {
    info!(cache = %self.settings.cache_name, "Activating");

    let mut removed = Vec::new();
    for name in self.store.keys()? {
      if name == self.settings.cache_name {
        continue;
      }
      info!(cache = %name, "Removing stale cache");
      self.store.delete(&name)?;
      removed.push(name);
    }

    self.state = WorkerState::Activated;
    self.clients_claimed = true;
    Ok(removed)
  }

  /// Pick the strategy for a request; first match wins.
  pub fn route(&self, request: &Request) -> Route {
    let host = request.url.host_str().unwrap_or_default();
    if host.contains(&self.settings.backend_marker) {
      return Route::NetworkOnly;
    }
    if request.method != Method::GET {
      return Route::NetworkOnly;
    }
    if request.destination == Destination::Document {
      return Route::NetworkFirst;
    }
    Route::CacheFirst
  }

  /// Answer an intercepted request.
  ///
  /// Cached routes always produce a response. Network-only routes pass the
  /// network error through, since there is nothing to fall back on.
  pub async fn handle_fetch(&self, request: &Request) -> Result<Response> {
    match self.route(request) {
      Route::NetworkOnly => self.fetcher.fetch(request).await,
      Route::NetworkFirst => Ok(self.network_first(request).await),
      Route::CacheFirst => Ok(self.cache_first(request).await),
    }
  }

  async fn network_first(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.remember(request.key(), &response);
        }
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, trying cache");
        if let Some(cached) = self.cached(request.key()) {
          return cached;
        }
        self
          .cached(self.settings.offline_page.as_str())
          .unwrap_or_else(Response::unavailable)
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Response {
    if let Some(cached) = self.cached(request.key()) {
      return cached;
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.remember(request.key(), &response);
        }
        response
      }
      Err(e) => {
        info!(url = %request.url, error = %e, "Offline with no cached copy");
        Response::unavailable()
      }
    }
  }

  /// Cache lookup where a storage error counts as a miss.
  fn cached(&self, url: &str) -> Option<Response> {
    match self.store.lookup(url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  fn remember(&self, url: &str, response: &Response) {
    if let Err(e) = self.store.put(&self.settings.cache_name, url, response) {
      warn!(url, error = %e, "Failed to cache response");
    }
  }
}
