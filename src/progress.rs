//! Progress records for in-flight and finished generations.
//!
//! One record per `(series, address)`, mutated through phase transitions and
//! retained until cleared or superseded, so observers can tell a fresh
//! generation from a cache hit or a failure after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// The image pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    BasePrompts,
    Enhance,
    ImageWait,
    ImagePrep,
    ImageDownload,
    Annotate,
    Completed,
}

impl GenerationPhase {
    pub const ALL: &[GenerationPhase] = &[
        GenerationPhase::BasePrompts,
        GenerationPhase::Enhance,
        GenerationPhase::ImageWait,
        GenerationPhase::ImagePrep,
        GenerationPhase::ImageDownload,
        GenerationPhase::Annotate,
        GenerationPhase::Completed,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Done,
    /// Explicitly not run (skip-image mode, placeholder payloads). Distinct
    /// from Pending so a skipped phase is never mistaken for unfinished work.
    Skipped,
    Failed,
}

/// The progress record for one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub series: String,
    pub address: String,
    pub phases: Vec<(GenerationPhase, PhaseStatus)>,
    pub cache_hit: bool,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressReport {
    fn new(series: &str, address: &str) -> Self {
        Self {
            series: series.to_string(),
            address: address.to_string(),
            phases: GenerationPhase::ALL
                .iter()
                .map(|p| (*p, PhaseStatus::Pending))
                .collect(),
            cache_hit: false,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn status(&self, phase: GenerationPhase) -> PhaseStatus {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.status(GenerationPhase::Completed) == PhaseStatus::Done
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn set(&mut self, phase: GenerationPhase, status: PhaseStatus) {
        if let Some(slot) = self.phases.iter_mut().find(|(p, _)| *p == phase) {
            slot.1 = status;
        }
    }
}

/// Keyed store of progress records.
pub struct ProgressTracker {
    reports: Mutex<HashMap<(String, String), ProgressReport>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
        }
    }

    /// Begin (or restart) tracking a generation. Supersedes any prior record
    /// for the key.
    pub fn start(&self, series: &str, address: &str) {
        let mut reports = self.reports.lock().expect("progress lock poisoned");
        reports.insert(
            (series.to_string(), address.to_string()),
            ProgressReport::new(series, address),
        );
    }

    pub fn set_phase(&self, series: &str, address: &str, phase: GenerationPhase, status: PhaseStatus) {
        self.with(series, address, |r| r.set(phase, status));
    }

    /// Mark the record failed, leaving the failing phase visible.
    pub fn fail(&self, series: &str, address: &str, message: &str) {
        self.with(series, address, |r| {
            for slot in r.phases.iter_mut() {
                if slot.1 == PhaseStatus::Running {
                    slot.1 = PhaseStatus::Failed;
                }
            }
            r.failure = Some(message.to_string());
            r.finished_at = Some(Utc::now());
        });
    }

    pub fn complete(&self, series: &str, address: &str, cache_hit: bool) {
        self.with(series, address, |r| {
            r.set(GenerationPhase::Completed, PhaseStatus::Done);
            r.cache_hit = cache_hit;
            r.finished_at = Some(Utc::now());
        });
    }

    /// Fabricate a finished record for a fast-path cache hit, purely for
    /// observability. Does nothing if a record already exists.
    pub fn synthesize_cache_hit(&self, series: &str, address: &str) {
        let mut reports = self.reports.lock().expect("progress lock poisoned");
        let key = (series.to_string(), address.to_string());
        if reports.contains_key(&key) {
            return;
        }
        let mut report = ProgressReport::new(series, address);
        for slot in report.phases.iter_mut() {
            slot.1 = PhaseStatus::Done;
        }
        report.cache_hit = true;
        report.finished_at = Some(Utc::now());
        reports.insert(key, report);
    }

    pub fn get(&self, series: &str, address: &str) -> Option<ProgressReport> {
        self.reports
            .lock()
            .expect("progress lock poisoned")
            .get(&(series.to_string(), address.to_string()))
            .cloned()
    }

    pub fn clear(&self, series: &str, address: &str) {
        self.reports
            .lock()
            .expect("progress lock poisoned")
            .remove(&(series.to_string(), address.to_string()));
    }

    fn with(&self, series: &str, address: &str, f: impl FnOnce(&mut ProgressReport)) {
        let mut reports = self.reports.lock().expect("progress lock poisoned");
        if let Some(report) = reports.get_mut(&(series.to_string(), address.to_string())) {
            f(report);
        }
    }
}
