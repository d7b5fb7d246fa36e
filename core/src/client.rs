/// Explicitly constructed handle to the backend capabilities
use crate::backend::memory::MemoryBackend;
use crate::backend::{AuthService, ModerationGate, Realtime, Store};
use crate::config::Config;
use std::sync::Arc;

/// Owned by the composition root and passed into every component.
#[derive(Clone)]
pub struct ChatClient {
    config: Config,
    store: Arc<dyn Store>,
    realtime: Arc<dyn Realtime>,
    auth: Arc<dyn AuthService>,
    moderation: Option<Arc<dyn ModerationGate>>,
}

impl ChatClient {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        realtime: Arc<dyn Realtime>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            config,
            store,
            realtime,
            auth,
            moderation: None,
        }
    }

    pub fn with_moderation(mut self, gate: Arc<dyn ModerationGate>) -> Self {
        self.moderation = Some(gate);
        self
    }

    /// Every capability served by one shared in-process backend
    pub fn in_memory(config: Config) -> (Self, MemoryBackend) {
        let backend = MemoryBackend::with_capacity(config.realtime_capacity);
        let shared = Arc::new(backend.clone());
        let client = Self::new(config, shared.clone(), shared.clone(), shared.clone())
            .with_moderation(shared);
        (client, backend)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn realtime(&self) -> Arc<dyn Realtime> {
        self.realtime.clone()
    }

    pub fn auth(&self) -> Arc<dyn AuthService> {
        self.auth.clone()
    }

    /// The gate only when moderation is switched on in config
    pub fn moderation(&self) -> Option<Arc<dyn ModerationGate>> {
        if self.config.moderation_enabled {
            self.moderation.clone()
        } else {
            None
        }
    }
}
