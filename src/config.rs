use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Cache generation used when the config file does not name one.
pub const DEFAULT_CACHE_VERSION: &str = "pspro-v1.0.0";

/// Assets pre-cached on install when the config file does not list any.
pub const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/login.html",
  "/manifest.json",
  "/js/supabase-config.js",
  "https://fonts.googleapis.com/css2?family=Poppins:wght@300;400;500;600;700;800&display=swap",
  "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2",
  "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Where unauthenticated users are sent
  #[serde(default = "default_login_path")]
  pub login_path: String,
  #[serde(default)]
  pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
  /// Public (anon) key. Falls back to the environment when absent.
  pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  /// Origin that relative asset paths are resolved against
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default = "default_cache_version")]
  pub cache_version: String,
  /// Requests whose host contains this marker always go to the network
  #[serde(default = "default_backend_marker")]
  pub backend_marker: String,
  /// Served to navigations that fail while offline with no cached copy
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_assets")]
  pub assets: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache_version: default_cache_version(),
      backend_marker: default_backend_marker(),
      offline_page: default_offline_page(),
      assets: default_assets(),
    }
  }
}

fn default_login_path() -> String {
  "/login.html".to_string()
}

fn default_origin() -> String {
  "http://localhost:8080/".to_string()
}

fn default_cache_version() -> String {
  DEFAULT_CACHE_VERSION.to_string()
}

fn default_backend_marker() -> String {
  "supabase".to_string()
}

fn default_offline_page() -> String {
  "/index.html".to_string()
}

fn default_assets() -> Vec<String> {
  DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pspro.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pspro/config.yaml
  ///
  /// `SUPABASE_URL` in the environment overrides the backend URL.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/pspro/config.yaml"
        ))
      }
    };

    if let Ok(url) = std::env::var("SUPABASE_URL") {
      config.backend.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("pspro.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pspro").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the anon key, preferring the config file.
  ///
  /// Checks PSPRO_SUPABASE_ANON_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn anon_key(&self) -> Result<String> {
    if let Some(key) = &self.backend.anon_key {
      return Ok(key.clone());
    }
    std::env::var("PSPRO_SUPABASE_ANON_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Anon key not found. Set backend.anon_key or the PSPRO_SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Get the login password from environment variables.
  ///
  /// Checks PSPRO_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("PSPRO_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set PSPRO_PASSWORD environment variable."))
  }

  /// Directory for the session file, cache database and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pspro"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("backend:\n  url: https://demo.supabase.co\n").unwrap();

    assert_eq!(config.login_path, "/login.html");
    assert_eq!(config.worker.cache_version, DEFAULT_CACHE_VERSION);
    assert_eq!(config.worker.backend_marker, "supabase");
    assert_eq!(config.worker.assets.len(), DEFAULT_ASSETS.len());
    assert!(config.backend.anon_key.is_none());
  }

  #[test]
  fn test_worker_overrides() {
    let yaml = r#"
backend:
  url: https://demo.supabase.co
  anon_key: public-key
worker:
  origin: https://app.example.com/
  cache_version: pspro-v2
  assets: ["/", "/app.js"]
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.worker.cache_version, "pspro-v2");
    assert_eq!(config.worker.assets, vec!["/", "/app.js"]);
    assert_eq!(config.worker.offline_page, "/index.html");
    assert_eq!(config.anon_key().unwrap(), "public-key");
  }

  #[test]
  fn test_missing_backend_is_an_error() {
    assert!(Config::parse("login_path: /login.html\n").is_err());
  }
}
