use crate::config::{load_ecosystem, AppDefinition, SupervisorSettings};
use crate::error::{Result, VigilError};
use crate::process::controller::{spawn_controller, ControllerHandle};
use crate::process::types::{AppStatus, StateChange};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// A registered app: either supervised, or rejected at load time
pub enum AppEntry {
    Managed(ControllerHandle),
    /// Configuration error that kept the app from being supervised
    Rejected(String),
}

/// Registry of every app, each driven by its own controller
pub struct Supervisor {
    apps: BTreeMap<String, AppEntry>,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            apps: BTreeMap::new(),
            settings,
        }
    }

    /// Build a supervisor from an ecosystem file
    ///
    /// Apps with a bad record are kept as rejected entries so their error
    /// shows up in `status`; the others get a controller each. Only an
    /// unreadable or unparseable file is an error.
    pub fn load(path: &Path, settings: SupervisorSettings) -> Result<Self> {
        let mut supervisor = Self::new(settings);

        for (name, definition) in load_ecosystem(path)? {
            match definition {
                Ok(definition) => supervisor.register(definition)?,
                Err(e) => {
                    tracing::error!("Refusing to supervise '{}': {}", name, e);
                    supervisor.register_rejected(&name, &e.to_string())?;
                }
            }
        }

        Ok(supervisor)
    }

    /// Add an app and spawn its controller (in Stopped)
    pub fn register(&mut self, definition: AppDefinition) -> Result<()> {
        let name = definition.spec.name.clone();
        self.ensure_unregistered(&name)?;

        let handle = spawn_controller(definition, &self.settings);
        self.apps.insert(name, AppEntry::Managed(handle));
        Ok(())
    }

    pub fn register_rejected(&mut self, name: &str, error: &str) -> Result<()> {
        self.ensure_unregistered(name)?;
        self.apps
            .insert(name.to_string(), AppEntry::Rejected(error.to_string()));
        Ok(())
    }

    /// Start every supervised app; failures are logged and reflected in status
    pub async fn start_all(&self) {
        for (name, entry) in &self.apps {
            if let AppEntry::Managed(handle) = entry {
                if let Err(e) = handle.start().await {
                    tracing::warn!("Failed to start '{}': {}", name, e);
                }
            }
        }
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.managed(name)?.start().await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.managed(name)?.stop().await
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        self.managed(name)?.restart().await
    }

    pub async fn reset(&self, name: &str) -> Result<()> {
        self.managed(name)?.reset().await
    }

    pub async fn status(&self, name: &str) -> Result<AppStatus> {
        match self.apps.get(name) {
            Some(AppEntry::Managed(handle)) => handle.status().await,
            Some(AppEntry::Rejected(error)) => Ok(AppStatus::rejected(name, error)),
            None => Err(VigilError::AppNotFound(name.to_string())),
        }
    }

    /// Status of every registered app, ordered by name
    pub async fn list(&self) -> Vec<AppStatus> {
        let mut statuses = Vec::with_capacity(self.apps.len());

        for name in self.apps.keys() {
            match self.status(name).await {
                Ok(status) => statuses.push(status),
                Err(e) => tracing::warn!("Failed to get status of '{}': {}", name, e),
            }
        }

        statuses
    }

    pub fn subscribe(&self, name: &str) -> Result<broadcast::Receiver<StateChange>> {
        Ok(self.managed(name)?.subscribe())
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    /// Shut every controller down concurrently
    ///
    /// Returns once every child is gone and every watcher and trigger released.
    pub async fn shutdown_all(&self) {
        let mut tasks = JoinSet::new();

        for entry in self.apps.values() {
            if let AppEntry::Managed(handle) = entry {
                let handle = handle.clone();
                tasks.spawn(async move { handle.shutdown().await });
            }
        }

        tracing::info!("Stopping {} apps", tasks.len());

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Shutdown task failed: {}", e);
            }
        }
    }

    fn managed(&self, name: &str) -> Result<&ControllerHandle> {
        match self.apps.get(name) {
            Some(AppEntry::Managed(handle)) => Ok(handle),
            Some(AppEntry::Rejected(error)) => Err(VigilError::InvalidState(
                name.to_string(),
                format!("configuration rejected: {}", error),
            )),
            None => Err(VigilError::AppNotFound(name.to_string())),
        }
    }

    fn ensure_unregistered(&self, name: &str) -> Result<()> {
        if self.apps.contains_key(name) {
            return Err(VigilError::AppAlreadyExists(name.to_string()));
        }
        Ok(())
    }
}
