use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Analysis,
    Embedding,
    Retrieval,
    ContextBuilding,
    Prompting,
    Generation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetric {
    pub stage: StageKind,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Slowest stage first.
    pub stages: Vec<StageMetric>,
    pub total_ms: f64,
}

/// Per-request stage timer. Not shared between requests.
#[derive(Debug)]
pub struct PerformanceTracker {
    created: Instant,
    running: HashMap<StageKind, Instant>,
    finished: Vec<(StageKind, Duration)>,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            running: HashMap::new(),
            finished: Vec::new(),
        }
    }

    pub fn start(&mut self, stage: StageKind) {
        self.running.insert(stage, Instant::now());
    }

    /// No-op for a stage that was never started.
    pub fn end(&mut self, stage: StageKind) {
        if let Some(started) = self.running.remove(&stage) {
            self.finished.push((stage, started.elapsed()));
        }
    }

    pub fn duration(&self, stage: StageKind) -> Option<Duration> {
        self.finished
            .iter()
            .find(|(kind, _)| *kind == stage)
            .map(|(_, duration)| *duration)
    }

    pub fn get_metrics(&self) -> PerformanceReport {
        let mut finished = self.finished.clone();
        finished.sort_by(|a, b| b.1.cmp(&a.1));

        PerformanceReport {
            stages: finished
                .into_iter()
                .map(|(stage, duration)| StageMetric {
                    stage,
                    duration_ms: millis(duration),
                })
                .collect(),
            total_ms: millis(self.created.elapsed()),
        }
    }
}
