//! Progress reporting for pipeline runs.
//!
//! The pipeline never logs on its own; it hands [`PipelineEvent`]s to an
//! injected [`PipelineObserver`]. [`TracingObserver`] turns them into
//! `tracing` events and [`RecordingObserver`] keeps them for inspection.

use std::collections::HashMap;
use std::time::Instant;

use super::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageFinished { stage: Stage },
    StageFailed { stage: Stage, message: String },
    ItemSucceeded { stage: Stage, item: String },
    ItemFailed { stage: Stage, item: String, message: String },
}

impl PipelineEvent {
    pub fn stage(&self) -> Stage {
        match self {
            Self::StageStarted { stage }
            | Self::StageFinished { stage }
            | Self::StageFailed { stage, .. }
            | Self::ItemSucceeded { stage, .. }
            | Self::ItemFailed { stage, .. } => *stage,
        }
    }
}

pub trait PipelineObserver {
    fn on_event(&mut self, event: &PipelineEvent);
}

/// Emits every event through `tracing`, with stage durations.
#[derive(Debug, Default)]
pub struct TracingObserver {
    started: HashMap<Stage, Instant>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineObserver for TracingObserver {
    fn on_event(&mut self, event: &PipelineEvent) {
        let stage = event.stage();
        let name = stage.name();
        match event {
            PipelineEvent::StageStarted { .. } => {
                self.started.insert(stage, Instant::now());
                tracing::info!(stage = name, "stage started");
            }
            PipelineEvent::StageFinished { .. } => {
                let elapsed_ms = self
                    .started
                    .remove(&stage)
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or_default();
                tracing::info!(stage = name, elapsed_ms, "stage finished");
            }
            PipelineEvent::StageFailed { message, .. } => {
                self.started.remove(&stage);
                tracing::error!(stage = name, error = %message, "stage failed");
            }
            PipelineEvent::ItemSucceeded { item, .. } => {
                tracing::debug!(stage = name, item = %item, "item done");
            }
            PipelineEvent::ItemFailed { item, message, .. } => {
                tracing::warn!(stage = name, item = %item, error = %message, "item failed");
            }
        }
    }
}

/// Keeps every event in order. Used by tests and by callers that want a
/// transcript of the run.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub events: Vec<PipelineEvent>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished_stages(&self) -> Vec<Stage> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageFinished { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    pub fn failed_items(&self) -> Vec<(Stage, &str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::ItemFailed { stage, item, .. } => Some((*stage, item.as_str())),
                _ => None,
            })
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&mut self, event: &PipelineEvent) {
        self.events.push(event.clone());
    }
}
