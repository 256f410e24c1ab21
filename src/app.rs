//! Application state shared by every IPC request

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{
    AppSettings, ConnectionStorage, CredentialStore, Keychain, ProfileStore, SnippetStorage,
    StorageError,
};
use crate::metrics::MetricsManager;
use crate::session::SessionRegistry;
use crate::ssh::{Connector, CredentialResolver, RusshConnector};

pub struct AppState {
    pub settings: AppSettings,
    pub profiles: Arc<dyn ProfileStore>,
    pub snippets: Arc<SnippetStorage>,
    pub credentials: Arc<dyn CredentialStore>,
    pub resolver: CredentialResolver,
    pub connector: Arc<dyn Connector>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: MetricsManager,
}

impl AppState {
    pub fn new(
        settings: AppSettings,
        profiles: Arc<dyn ProfileStore>,
        snippets: Arc<SnippetStorage>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let resolver = CredentialResolver::new(Arc::clone(&credentials));
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&profiles),
            resolver.clone(),
            Arc::clone(&connector),
        ));
        let metrics = MetricsManager::new(Arc::clone(&connector));

        Self {
            settings,
            profiles,
            snippets,
            credentials,
            resolver,
            connector,
            registry,
            metrics,
        }
    }

    /// Production wiring: JSON stores under `data_dir`, OS keychain, russh
    pub fn open(data_dir: &Path, settings: AppSettings) -> Result<Self, StorageError> {
        let profiles = Arc::new(ConnectionStorage::open(data_dir.join("connections.json"))?);
        let snippets = Arc::new(SnippetStorage::open(data_dir.join("snippets.json"))?);
        let connector = Arc::new(RusshConnector::new(
            settings.connect_timeout(),
            settings.keepalive_interval(),
        ));
        info!("Data directory: {}", data_dir.display());

        Ok(Self::new(
            settings,
            profiles,
            snippets,
            Arc::new(Keychain::new()),
            connector,
        ))
    }

    /// Stop the poller and close every session
    pub async fn shutdown(&self) {
        self.metrics.stop().await;
        let closed = self.registry.close_all().await;
        info!("Shutdown complete ({} sessions closed)", closed);
    }
}
