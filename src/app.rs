use crate::backend::{SessionStore, SupabaseClient, User};
use crate::config::Config;
use crate::guard::{SessionGuard, TerminalNavigator};
use crate::repo::{Client, Profile, QuoteWithItems, Repositories, RowId, Service};
use crate::worker::{
  CacheStore, Destination, HttpFetcher, OfflineWorker, Precache, Request, ResponseSource,
  SqliteCacheStore, WorkerSettings,
};
use crate::{Command, ProfileAction, QuoteAction, RecordAction, WorkerAction};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Main application state: one backend client shared by the guard and the
/// repositories, built once per process.
pub struct App {
  config: Config,
  data_dir: PathBuf,
  guard: SessionGuard<SupabaseClient>,
  repos: Repositories<SupabaseClient>,
}

impl App {
  pub fn new(config: Config, data_dir: PathBuf) -> Result<Self> {
    let store = SessionStore::at(data_dir.join("session.json"));
    let backend = Arc::new(SupabaseClient::new(&config, store)?);

    let guard = SessionGuard::new(
      backend.clone(),
      Arc::new(TerminalNavigator),
      config.login_path.clone(),
    );
    let repos = Repositories::new(backend);

    Ok(Self {
      config,
      data_dir,
      guard,
      repos,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Login { email } => {
        let password = Config::get_password()?;
        let session = self.guard.sign_in(&email, &password).await?;
        print_json(&session.user)
      }
      Command::Logout => {
        if self.guard.end_session().await {
          Ok(())
        } else {
          Err(eyre!("Sign out failed; see the log for details"))
        }
      }
      Command::Whoami => match self.guard.current_user().await {
        Some(user) => print_json(&user),
        None => Err(eyre!("Not signed in")),
      },
      Command::Worker { action } => self.run_worker(action).await,
      command => {
        let Some(user) = self.guard.require_session().await else {
          return Ok(());
        };
        self.run_data(&user, command).await
      }
    }
  }

  async fn run_data(&self, user: &User, command: Command) -> Result<()> {
    let user = Some(user);
    match command {
      Command::Profile { action } => match action {
        ProfileAction::Show => print_json(&self.repos.profile.load(user).await),
        ProfileAction::Save { file } => {
          let profile: Profile = read_json(&file)?;
          print_saved(self.repos.profile.save(user, &profile).await)
        }
      },
      Command::Clients { action } => match action {
        RecordAction::List => print_json(&self.repos.clients.load_all(user).await),
        RecordAction::Get { id } => {
          print_json(&self.repos.clients.get(user, &RowId::from(id.as_str())).await)
        }
        RecordAction::Save { file } => {
          let client: Client = read_json(&file)?;
          print_saved(self.repos.clients.save(user, &client).await)
        }
      },
      Command::Services { action } => match action {
        RecordAction::List => print_json(&self.repos.services.load_all(user).await),
        RecordAction::Get { id } => {
          print_json(&self.repos.services.get(user, &RowId::from(id.as_str())).await)
        }
        RecordAction::Save { file } => {
          let service: Service = read_json(&file)?;
          print_saved(self.repos.services.save(user, &service).await)
        }
      },
      Command::Quotes { action } => match action {
        QuoteAction::List => print_json(&self.repos.quotes.load_all(user).await),
        QuoteAction::Get { id } => {
          print_json(&self.repos.quotes.get(user, &RowId::from(id.as_str())).await)
        }
        QuoteAction::Save { file } => {
          let input: QuoteWithItems = read_json(&file)?;
          print_saved(
            self
              .repos
              .quotes
              .save(user, &input.quote, &input.items)
              .await,
          )
        }
        QuoteAction::Status { id, status } => print_saved(
          self
            .repos
            .quotes
            .update_status(user, &RowId::from(id.as_str()), &status)
            .await,
        ),
      },
      Command::Stats => print_json(&self.repos.stats.dashboard(user).await),
      Command::Login { .. } | Command::Logout | Command::Whoami | Command::Worker { .. } => {
        Err(eyre!("Command does not operate on data"))
      }
    }
  }

  fn worker(&self) -> Result<OfflineWorker<HttpFetcher, SqliteCacheStore>> {
    let settings = WorkerSettings::from_config(&self.config.worker)?;
    let store = SqliteCacheStore::open_at(&self.data_dir.join("worker-cache.db"))?;
    Ok(OfflineWorker::new(HttpFetcher::new()?, store, settings))
  }

  async fn run_worker(&self, action: WorkerAction) -> Result<()> {
    let mut worker = self.worker()?;

    match action {
      WorkerAction::Install => {
        let outcome = worker.install().await;
        debug!(state = ?worker.state(), skip_waiting = worker.skips_waiting(), "Install finished");
        match outcome {
          Precache::Complete(count) => {
            println!("Cached {} assets in {}", count, worker.settings().cache_name);
            Ok(())
          }
          Precache::Abandoned => Err(eyre!("Pre-caching abandoned; see the log for details")),
        }
      }
      WorkerAction::Activate => {
        for name in worker.activate().await? {
          println!("Removed {}", name);
        }
        debug!(
          state = ?worker.state(),
          clients_claimed = worker.has_claimed_clients(),
          "Activate finished"
        );
        Ok(())
      }
      WorkerAction::Fetch {
        url,
        method,
        document,
      } => {
        let url = resolve_url(&self.config.worker.origin, &url)?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
        let mut request = if document {
          Request::navigate(url)
        } else {
          let destination = Destination::infer_within(&url, &worker.settings().origin);
          Request::get(url, destination)
        };
        request.method = method;

        let response = worker.handle_fetch(&request).await?;
        let source = match response.source {
          ResponseSource::Network => "network",
          ResponseSource::Cache => "cache",
          ResponseSource::Synthetic => "offline fallback",
        };
        eprintln!("{} ({})", response.status, source);
        std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write response body: {}", e))
      }
      WorkerAction::Caches => {
        let store = worker.store();
        for name in store.keys()? {
          let current = if name == worker.settings().cache_name {
            " (current)"
          } else {
            ""
          };
          println!("{}{}", name, current);
          for entry in store.entries(&name)? {
            println!(
              "  {} {} {}B {} {}",
              entry.status,
              entry.url,
              entry.size,
              &entry.digest[..12],
              entry.cached_at.format("%Y-%m-%d %H:%M:%S")
            );
          }
        }
        Ok(())
      }
    }
  }
}

/// Accept absolute URLs or paths relative to the worker origin.
fn resolve_url(origin: &str, raw: &str) -> Result<Url> {
  match Url::parse(raw) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(origin)
      .and_then(|base| base.join(raw))
      .map_err(|e| eyre!("Invalid URL {}: {}", raw, e)),
    Err(e) => Err(eyre!("Invalid URL {}: {}", raw, e)),
  }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", rendered);
  Ok(())
}

/// Print a saved row, or fail the command when the save was rejected.
fn print_saved<T: Serialize>(saved: Option<T>) -> Result<()> {
  match saved {
    Some(row) => print_json(&row),
    None => Err(eyre!("Save failed; see the log for details")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_url() {
    let origin = "https://app.example.com/";
    assert_eq!(
      resolve_url(origin, "/js/app.js").unwrap().as_str(),
      "https://app.example.com/js/app.js"
    );
    assert_eq!(
      resolve_url(origin, "https://cdn.example.com/x.css")
        .unwrap()
        .as_str(),
      "https://cdn.example.com/x.css"
    );
  }
}
