use muse::{MaintenanceReport, PhaseReport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PhaseResponse {
    #[serde(flatten)]
    pub report: PhaseReport,
}

#[derive(Debug, Serialize)]
pub struct StaleResponse {
    pub checked: usize,
    pub stale: Vec<StaleEntry>,
}

#[derive(Debug, Serialize)]
pub struct StaleEntry {
    pub id: String,
    pub content: String,
    pub age_days: f64,
    pub score: f64,
}

impl From<MaintenanceReport> for StaleResponse {
    fn from(report: MaintenanceReport) -> Self {
        Self {
            checked: report.checked,
            stale: report
                .stale
                .into_iter()
                .map(|m| StaleEntry {
                    id: m.id,
                    content: m.content,
                    age_days: m.age_days,
                    score: m.score,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
