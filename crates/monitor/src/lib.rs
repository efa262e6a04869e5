#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use vault_round_core::{RoundSession, RoundView, SessionConfig};

pub mod api;
pub mod config;
pub mod runtime;

pub use api::{ApiState, router};
pub use config::{ConfigError, MonitorConfig, help_text};
pub use runtime::{MonitorDiagnostics, MonitorRuntime, RuntimeClock};

/// A [`RoundSession`] shared between the poll loop and the status endpoint.
#[derive(Debug, Clone)]
pub struct SharedRoundSession {
    inner: Arc<Mutex<RoundSession>>,
}

impl SharedRoundSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RoundSession::new(config))),
        }
    }

    /// Runs `update` under the session lock. Never hold the lock across an await point.
    pub fn with<T>(&self, update: impl FnOnce(&mut RoundSession) -> T) -> Result<T, String> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| "round session lock poisoned".to_string())?;
        Ok(update(&mut guard))
    }

    pub fn view(&self) -> Result<RoundView, String> {
        self.with(|session| session.view().clone())
    }
}
