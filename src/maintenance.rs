//! Memory maintenance: stale detection and admin pruning
//!
//! Nothing here runs automatically. Stale memories are only reported during
//! normal operation; deletion happens when an operator asks for it.

use crate::cortex::MemoryCortex;
use crate::error::Result;
use crate::types::{Memory, MemoryId};
use serde::{Deserialize, Serialize};

/// Maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Minimum age in days (since last stated) before a memory can be stale
    pub min_days_old: f64,
    /// Decayed score below which an old memory is stale
    pub max_score: f64,
    /// Most memories reported or pruned per run
    pub limit: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            min_days_old: 90.0,
            max_score: 0.3,
            limit: 50,
        }
    }
}

/// Maintenance report
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Total memories checked
    pub checked: usize,
    /// Stale memories found, oldest first
    pub stale: Vec<StaleMemory>,
    /// Number of memories deleted
    pub pruned: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleMemory {
    pub id: MemoryId,
    pub content: String,
    pub age_days: f64,
    pub score: f64,
}

impl StaleMemory {
    fn from_memory(memory: &Memory, half_life_days: f64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: memory.id.clone(),
            content: memory.content.clone(),
            age_days: memory.age_days(now),
            score: crate::cortex::score(memory, now, half_life_days, 1.0),
        }
    }
}

/// Find stale memories and, unless `dry_run`, delete them
pub async fn prune_stale(
    cortex: &MemoryCortex,
    user_id: &str,
    config: &MaintenanceConfig,
    dry_run: bool,
) -> Result<MaintenanceReport> {
    let checked = cortex.store().count_memories(user_id).await?;
    let stale = cortex.stale(user_id, config).await?;
    let half_life = cortex.config().half_life_days;

    let mut report = MaintenanceReport {
        checked: usize::try_from(checked).unwrap_or_default(),
        stale: stale.iter().map(|m| StaleMemory::from_memory(m, half_life)).collect(),
        pruned: 0,
        dry_run,
    };

    if dry_run || stale.is_empty() {
        tracing::debug!(user = %user_id, stale = report.stale.len(), "stale scan (dry run)");
        return Ok(report);
    }

    let ids: Vec<MemoryId> = stale.into_iter().map(|m| m.id).collect();
    report.pruned = cortex.delete_locked(user_id, &ids).await?;
    tracing::info!(user = %user_id, pruned = report.pruned, "pruned stale memories");
    Ok(report)
}

/// Builder for maintenance config
pub struct MaintenanceConfigBuilder {
    config: MaintenanceConfig,
}

impl MaintenanceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MaintenanceConfig::default(),
        }
    }

    pub fn min_days_old(mut self, days: f64) -> Self {
        self.config.min_days_old = days;
        self
    }

    pub fn max_score(mut self, score: f64) -> Self {
        self.config.max_score = score;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    pub fn build(self) -> MaintenanceConfig {
        self.config
    }
}

impl Default for MaintenanceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
