use std::{path::PathBuf, time::Duration};

use crate::{Client, Result, SyncThreadConfig, SynchronizerConfig};

/// Where hits, allocations and context documents are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Keep everything in memory. Nothing survives a restart.
    InMemory,
    /// SQLite database at the given path, created if missing.
    Sqlite(PathBuf),
}

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) env_id: String,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) storage: Storage,
    pub(crate) request_timeout: Duration,
    pub(crate) synchronizer: SynchronizerConfig,
    pub(crate) sync_thread: SyncThreadConfig,
}

impl ClientConfig {
    /// Create a default configuration for the given environment.
    ///
    /// ```
    /// # use flagtrack::ClientConfig;
    /// ClientConfig::from_env_id("env-id", "api-key");
    /// ```
    pub fn from_env_id(env_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        ClientConfig {
            env_id: env_id.into(),
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            storage: Storage::InMemory,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            synchronizer: SynchronizerConfig::default(),
            sync_thread: SyncThreadConfig::default(),
        }
    }

    /// Default base URL of the collector.
    pub const DEFAULT_BASE_URL: &'static str = "https://events.flagtrack.io/v1";

    /// Default bound on every network request.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Persist data in an SQLite database at `path`.
    ///
    /// ```
    /// # use flagtrack::ClientConfig;
    /// let mut config = ClientConfig::from_env_id("env-id", "api-key");
    /// config.sqlite("/data/app/flagtrack.db");
    /// ```
    pub fn sqlite(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.storage = Storage::Sqlite(path.into());
        self
    }

    /// Select where data is persisted. Defaults to [`Storage::InMemory`].
    pub fn storage(&mut self, storage: Storage) -> &mut Self {
        self.storage = storage;
        self
    }

    /// Bound on every network request. Defaults to [`ClientConfig::DEFAULT_REQUEST_TIMEOUT`].
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = timeout;
        self
    }

    /// Override synchronization pass settings.
    pub fn synchronizer(&mut self, config: SynchronizerConfig) -> &mut Self {
        self.synchronizer = config;
        self
    }

    /// Override background synchronization thread settings.
    pub fn sync_thread(&mut self, config: SyncThreadConfig) -> &mut Self {
        self.sync_thread = config;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    pub fn to_client(&self) -> Result<Client> {
        Client::new(self.clone())
    }
}
