//! Engine configuration

use crate::cache::ActionCacheConfig;
use crate::cortex::MemoryConfig;
use crate::error::{MuseError, Result};
use crate::intent::IntentConfig;
use crate::maintenance::MaintenanceConfig;
use crate::prompt::DEFAULT_PERSONA;
use crate::providers::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything tunable about the turn pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub caches: ActionCacheConfig,
    pub memory: MemoryConfig,
    pub intent: IntentConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub persona: String,
    /// Prior messages included in the generation request
    pub history_window: usize,
    /// Buffered events between the model stream and the consumer
    pub channel_capacity: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            caches: ActionCacheConfig::default(),
            memory: MemoryConfig::default(),
            intent: IntentConfig::default(),
            retry: RetryConfig::default(),
            maintenance: MaintenanceConfig::default(),
            persona: DEFAULT_PERSONA.to_string(),
            history_window: 12,
            channel_capacity: 64,
            temperature: 0.7,
            max_tokens: 1200,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .map_err(|e| MuseError::Configuration(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.half_life_days <= 0.0 {
            return Err(MuseError::Configuration("memory.half_life_days must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.intent.search_confidence_gate) {
            return Err(MuseError::Configuration(
                "intent.search_confidence_gate must be within 0..=1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(MuseError::Configuration("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.config.persona = persona.into();
        self
    }

    pub fn history_window(mut self, window: usize) -> Self {
        self.config.history_window = window;
        self
    }

    pub fn classification_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.intent.timeout = timeout;
        self
    }

    pub fn search_confidence_gate(mut self, gate: f32) -> Self {
        self.config.intent.search_confidence_gate = gate;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = memory;
        self
    }

    pub fn caches(mut self, caches: ActionCacheConfig) -> Self {
        self.config.caches = caches;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
