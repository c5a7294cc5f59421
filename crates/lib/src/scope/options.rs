use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::{Passphrase, Transform};
use crate::consts::{DEFAULT_STAGE, DEFAULT_STATE_DIR, ENV_PASSPHRASE, ENV_PHASE, ENV_STAGE, ENV_STATE_DIR};
use crate::resource::ProviderRegistry;
use crate::state::{FileSystemStateStore, StateStoreFactory};
use crate::value::SecretRegistry;

/// What a run does with the resources it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
  /// Reconcile every declared resource and sweep orphans.
  #[default]
  Up,
  /// Resolve resources from state without calling providers.
  Read,
  /// Delete everything recorded, in reverse creation order.
  Destroy,
}

impl Phase {
  pub fn as_str(self) -> &'static str {
    match self {
      Phase::Up => "up",
      Phase::Read => "read",
      Phase::Destroy => "destroy",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Phase {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "up" => Ok(Phase::Up),
      "read" => Ok(Phase::Read),
      "destroy" => Ok(Phase::Destroy),
      other => Err(ConfigError::InvalidPhase(other.to_string())),
    }
  }
}

/// How a batch of deletions is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestroyStrategy {
  /// One at a time, newest first.
  #[default]
  Sequential,
  /// All at once.
  Parallel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("invalid phase '{0}': expected one of up, read, destroy")]
  InvalidPhase(String),
}

/// Configuration of a root scope.
#[derive(Clone)]
pub struct RootOptions {
  /// Name of the root scope; the first segment of every fully-qualified name.
  pub app: Option<String>,
  pub stage: String,
  pub passphrase: Option<Passphrase>,
  pub phase: Phase,
  pub state_store: StateStoreFactory,
  pub destroy_strategy: DestroyStrategy,
  /// Log per-resource transitions at debug instead of info.
  pub quiet: bool,
  /// scrypt work factor for new secret ciphertexts; `None` lets age calibrate.
  pub work_factor: Option<u8>,
  pub providers: Arc<ProviderRegistry>,
  pub secrets: Arc<SecretRegistry>,
  pub transform: Option<Transform>,
}

impl Default for RootOptions {
  fn default() -> Self {
    Self {
      app: None,
      stage: DEFAULT_STAGE.to_string(),
      passphrase: None,
      phase: Phase::default(),
      state_store: FileSystemStateStore::factory(DEFAULT_STATE_DIR),
      destroy_strategy: DestroyStrategy::default(),
      quiet: false,
      work_factor: None,
      providers: Arc::new(ProviderRegistry::new()),
      secrets: Arc::new(SecretRegistry::new()),
      transform: None,
    }
  }
}

impl RootOptions {
  pub fn new(app: impl Into<String>) -> Self {
    Self {
      app: Some(app.into()),
      ..Self::default()
    }
  }

  /// Options for `app` configured from the environment.
  ///
  /// Reads `CAIRN_STAGE` (falling back to `$USER`, then `dev`),
  /// `CAIRN_PASSPHRASE`, `CAIRN_STATE_DIR` and `CAIRN_PHASE`.
  pub fn from_env(app: impl Into<String>) -> Result<Self, ConfigError> {
    let stage = non_empty_var(ENV_STAGE)
      .or_else(|| non_empty_var("USER"))
      .unwrap_or_else(|| DEFAULT_STAGE.to_string());
    let state_dir = non_empty_var(ENV_STATE_DIR).map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from);
    let phase = match non_empty_var(ENV_PHASE) {
      Some(raw) => raw.parse()?,
      None => Phase::default(),
    };

    Ok(Self {
      stage,
      passphrase: non_empty_var(ENV_PASSPHRASE).map(Passphrase::new),
      phase,
      state_store: FileSystemStateStore::factory(state_dir),
      ..Self::new(app)
    })
  }

  pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
    self.stage = stage.into();
    self
  }

  pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
    self.passphrase = Some(Passphrase::new(passphrase));
    self
  }

  pub fn with_phase(mut self, phase: Phase) -> Self {
    self.phase = phase;
    self
  }

  pub fn with_state_store(mut self, factory: StateStoreFactory) -> Self {
    self.state_store = factory;
    self
  }

  pub fn with_destroy_strategy(mut self, strategy: DestroyStrategy) -> Self {
    self.destroy_strategy = strategy;
    self
  }

  pub fn with_quiet(mut self, quiet: bool) -> Self {
    self.quiet = quiet;
    self
  }

  pub fn with_work_factor(mut self, log_n: u8) -> Self {
    self.work_factor = Some(log_n);
    self
  }

  pub fn with_providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
    self.providers = providers;
    self
  }

  pub fn with_secrets(mut self, secrets: Arc<SecretRegistry>) -> Self {
    self.secrets = secrets;
    self
  }

  pub fn with_transform(mut self, transform: Transform) -> Self {
    self.transform = Some(transform);
    self
  }
}

impl fmt::Debug for RootOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RootOptions")
      .field("app", &self.app)
      .field("stage", &self.stage)
      .field("passphrase", &self.passphrase)
      .field("phase", &self.phase)
      .field("destroy_strategy", &self.destroy_strategy)
      .field("quiet", &self.quiet)
      .field("work_factor", &self.work_factor)
      .field("providers", &self.providers)
      .finish_non_exhaustive()
  }
}

/// Overrides for a nested scope. Anything left unset is inherited.
#[derive(Debug, Clone, Default)]
pub struct ScopeOptions {
  pub stage: Option<String>,
  pub passphrase: Option<Passphrase>,
  pub destroy_strategy: Option<DestroyStrategy>,
  pub quiet: Option<bool>,
}

impl ScopeOptions {
  pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
    self.stage = Some(stage.into());
    self
  }

  pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
    self.passphrase = Some(Passphrase::new(passphrase));
    self
  }

  pub fn with_destroy_strategy(mut self, strategy: DestroyStrategy) -> Self {
    self.destroy_strategy = Some(strategy);
    self
  }

  pub fn with_quiet(mut self, quiet: bool) -> Self {
    self.quiet = Some(quiet);
    self
  }
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
