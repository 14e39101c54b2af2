//! Session guard: who is signed in, and where to send them when nobody is.

use crate::backend::{Backend, Session, User};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where a redirect actually goes. The CLI tells the user to log in; tests record.
pub trait Navigator: Send + Sync {
  fn redirect(&self, path: &str);
}

/// Navigator for the command line: there is no page to load, so point the
/// user at `pspro login` instead.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
  fn redirect(&self, path: &str) {
    info!(target = path, "Redirecting to login");
    eprintln!("Not signed in ({}). Run `pspro login --email <email>` first.", path);
  }
}

pub struct SessionGuard<B> {
  backend: Arc<B>,
  navigator: Arc<dyn Navigator>,
  login_path: String,
}

impl<B: Backend> SessionGuard<B> {
  pub fn new(backend: Arc<B>, navigator: Arc<dyn Navigator>, login_path: impl Into<String>) -> Self {
    Self {
      backend,
      navigator,
      login_path: login_path.into(),
    }
  }

  /// The signed-in user. Without one, redirects to login and returns `None`;
  /// callers must stop there.
  #[must_use]
  pub async fn require_session(&self) -> Option<User> {
    match self.backend.session().await {
      Ok(Some(session)) => Some(session.user),
      Ok(None) => {
        self.navigator.redirect(&self.login_path);
        None
      }
      Err(e) => {
        warn!(error = %e, "Session check failed");
        self.navigator.redirect(&self.login_path);
        None
      }
    }
  }

  /// The signed-in user, if any. Never redirects.
  pub async fn current_user(&self) -> Option<User> {
    match self.backend.user().await {
      Ok(user) => user,
      Err(e) => {
        error!(error = %e, "Failed to get current user");
        None
      }
    }
  }

  /// Sign out remotely, then redirect. On failure nothing changes locally.
  ///
  /// Returns whether the session was ended.
  pub async fn end_session(&self) -> bool {
    match self.backend.sign_out().await {
      Ok(()) => {
        self.navigator.redirect(&self.login_path);
        true
      }
      Err(e) => {
        error!(error = %e, "Failed to sign out");
        false
      }
    }
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
    self.backend.sign_in(email, password).await
  }
}
