//! Request/response types seen by the worker, and the network behind it.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use url::Url;

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// Top-level page navigation
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  #[default]
  Other,
}

impl Destination {
  /// Best guess from the URL path, for requests that do not say.
  pub fn infer(url: &Url) -> Self {
    let name = last_segment(url);
    let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
      Some("html" | "htm") => Destination::Document,
      None if name.is_empty() => Destination::Document,
      Some("js" | "mjs") => Destination::Script,
      Some("css") => Destination::Style,
      Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico") => Destination::Image,
      Some("woff" | "woff2" | "ttf" | "otf") => Destination::Font,
      Some("json" | "webmanifest") => Destination::Manifest,
      _ => Destination::Other,
    }
  }

  /// Like `infer`, but an extensionless path on the app's own origin is a
  /// page (clean URLs such as `/clientes`).
  pub fn infer_within(url: &Url, origin: &Url) -> Self {
    if url.origin() == origin.origin() && !last_segment(url).contains('.') {
      return Destination::Document;
    }
    Self::infer(url)
  }
}

fn last_segment(url: &Url) -> &str {
  url.path().rsplit('/').next().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url, destination: Destination) -> Self {
    Self {
      method: Method::GET,
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self::get(url, Destination::Document)
  }

  /// Cache key: the full URL.
  pub fn key(&self) -> &str {
    self.url.as_str()
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Made up by the worker when nothing else was available
  Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  /// The stand-in returned when an asset is neither cached nor reachable.
  pub fn unavailable() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Offline".to_vec(),
      source: ResponseSource::Synthetic,
    }
  }

  /// 2xx, the only responses worth caching.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// The network, as far as the worker is concerned.
///
/// `Err` means the request never produced a response (offline, DNS, TLS...);
/// an HTTP error status is still `Ok`.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dest(url: &str) -> Destination {
    Destination::infer(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_infer_destination() {
    assert_eq!(dest("https://app.example.com/"), Destination::Document);
    assert_eq!(dest("https://app.example.com/login.html"), Destination::Document);
    assert_eq!(dest("https://app.example.com/js/app.js"), Destination::Script);
    assert_eq!(dest("https://app.example.com/css/Site.CSS"), Destination::Style);
    assert_eq!(dest("https://app.example.com/font.woff2"), Destination::Font);
    assert_eq!(dest("https://app.example.com/manifest.json"), Destination::Manifest);
    assert_eq!(dest("https://cdn.example.com/npm/lib@2"), Destination::Other);
  }

  #[test]
  fn test_clean_urls_on_app_origin_are_pages() {
    let origin = Url::parse("https://app.example.com/").unwrap();
    let within = |url: &str| Destination::infer_within(&Url::parse(url).unwrap(), &origin);

    assert_eq!(within("https://app.example.com/clientes"), Destination::Document);
    assert_eq!(within("https://app.example.com/v1.2/orcamentos"), Destination::Document);
    assert_eq!(within("https://app.example.com/js/app.js"), Destination::Script);
    assert_eq!(within("https://cdn.example.com/npm/lib@2"), Destination::Other);
    assert_eq!(dest("https://app.example.com/clientes"), Destination::Other);
  }

  #[test]
  fn test_response_ok_range() {
    assert!(Response::new(200, "x").is_ok());
    assert!(Response::new(204, "").is_ok());
    assert!(!Response::new(304, "").is_ok());
    assert!(!Response::new(404, "nope").is_ok());

    let offline = Response::unavailable();
    assert_eq!(offline.status, 503);
    assert_eq!(offline.source, ResponseSource::Synthetic);
  }
}
