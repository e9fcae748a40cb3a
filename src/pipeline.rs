//! Pipeline orchestration.
//!
//! The run is a DAG over four named steps; the dependency graph is held
//! explicitly and executed in topological order. Each node invokes a typed
//! async step through the [`StepExecutor`] seam and reports a structured
//! outcome; a failed node marks every transitive dependent skipped for the
//! rest of the run. The orchestrator never retries — re-invoking the whole
//! DAG is always safe because every step is idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::detect::Enricher;
use crate::lake::{self, Lake};
use crate::metrics;
use crate::source::Ingestor;
use crate::warehouse::Warehouse;

/// One orchestrated unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    /// Ingest messages and media into the partition store
    Scrape,
    /// Load message batches into the warehouse (insert-or-skip)
    LoadRaw,
    /// Run object detection over stored media
    Detect,
    /// Load detection records into the warehouse (insert-or-replace)
    LoadDetections,
}

impl Step {
    /// Every step, in declaration order.
    pub const ALL: [Self; 4] = [Self::Scrape, Self::LoadRaw, Self::Detect, Self::LoadDetections];

    /// Steps that must succeed before this one may run.
    #[must_use]
    pub const fn upstream(self) -> &'static [Self] {
        match self {
            Self::Scrape => &[],
            Self::LoadRaw | Self::Detect => &[Self::Scrape],
            Self::LoadDetections => &[Self::Detect],
        }
    }

    /// Stable name used in logs and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::LoadRaw => "load-raw",
            Self::Detect => "detect",
            Self::LoadDetections => "load-detections",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The step finished; carries its human-readable summary
    Succeeded(String),
    /// The step failed; carries the error chain
    Failed(String),
    /// The step never ran because an upstream step did not succeed
    Skipped {
        /// The upstream step that blocked this one
        blocked_on: Step,
    },
}

/// Per-step entry of a [`RunReport`].
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The step this entry describes
    pub step: Step,
    /// How the step ended
    pub status: StepStatus,
    /// Wall-clock duration; zero for skipped steps
    pub duration: Duration,
}

/// Structured outcome of one full DAG run.
#[derive(Debug)]
pub struct RunReport {
    /// When the run started (UTC)
    pub started_utc: DateTime<Utc>,
    /// When the run finished (UTC)
    pub finished_utc: DateTime<Utc>,
    /// One entry per step, in execution order
    pub steps: Vec<StepResult>,
}

impl RunReport {
    /// True only if every step succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Succeeded(_)))
    }

    /// Names of the steps that failed outright (skipped steps excluded).
    #[must_use]
    pub fn failed_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
            .map(|s| s.step)
            .collect()
    }

    /// One-line human summary naming any failed steps.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.success() {
            format!("all {} steps succeeded", self.steps.len())
        } else {
            let failed: Vec<&str> = self.failed_steps().iter().map(|s| s.name()).collect();
            format!("run failed at: {}", failed.join(", "))
        }
    }
}

/// Seam between the dependency graph and the underlying work, so the graph
/// logic is testable in isolation from the real components.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step to completion, returning its summary line.
    async fn execute(&self, step: Step) -> Result<String>;
}

/// Compute a topological order of all steps from the adjacency structure.
fn topological_order() -> Vec<Step> {
    let mut remaining: BTreeMap<Step, BTreeSet<Step>> = Step::ALL
        .iter()
        .map(|step| (*step, step.upstream().iter().copied().collect()))
        .collect();
    let mut order = Vec::with_capacity(Step::ALL.len());

    while !remaining.is_empty() {
        let ready: Vec<Step> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(step, _)| *step)
            .collect();
        if ready.is_empty() {
            // Unreachable with the static graph above; avoid spinning if a
            // future edit introduces a cycle.
            break;
        }
        for step in &ready {
            remaining.remove(step);
        }
        for deps in remaining.values_mut() {
            for step in &ready {
                deps.remove(step);
            }
        }
        order.extend(ready);
    }

    debug_assert_eq!(order.len(), Step::ALL.len(), "step graph contains a cycle");
    order
}

/// Executes the step DAG and reports structured outcomes.
pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
}

impl Orchestrator {
    /// Build an orchestrator over a step executor.
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self { executor }
    }

    /// Execute one full DAG run.
    ///
    /// Steps run in topological order; a step whose upstream did not
    /// succeed is skipped together with everything downstream of it.
    pub async fn run_once(&self) -> RunReport {
        let started_utc = Utc::now();
        let mut statuses: BTreeMap<Step, StepStatus> = BTreeMap::new();
        let mut steps = Vec::new();

        for step in topological_order() {
            let blocker = step.upstream().iter().copied().find(|upstream| {
                !matches!(statuses.get(upstream), Some(StepStatus::Succeeded(_)))
            });

            if let Some(blocked_on) = blocker {
                warn!(step = %step, blocked_on = %blocked_on, "step skipped; upstream did not succeed");
                let status = StepStatus::Skipped { blocked_on };
                statuses.insert(step, status.clone());
                steps.push(StepResult {
                    step,
                    status,
                    duration: Duration::ZERO,
                });
                continue;
            }

            info!(step = %step, "step started");
            let start = Instant::now();
            let status = match self.executor.execute(step).await {
                Ok(summary) => {
                    info!(step = %step, elapsed_ms = start.elapsed().as_millis() as u64, %summary, "step succeeded");
                    StepStatus::Succeeded(summary)
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(step = %step, error = %message, "step failed");
                    StepStatus::Failed(message)
                }
            };
            let duration = start.elapsed();
            metrics::record_step(
                step.name(),
                duration,
                matches!(status, StepStatus::Succeeded(_)),
            );
            statuses.insert(step, status.clone());
            steps.push(StepResult {
                step,
                status,
                duration,
            });
        }

        let report = RunReport {
            started_utc,
            finished_utc: Utc::now(),
            steps,
        };
        info!(summary = %report.summary(), "pipeline run finished");
        report
    }

    /// Start a fresh DAG run every `every` interval, forever.
    ///
    /// The next tick waits for the current run, so scheduled runs never
    /// overlap. The first run starts immediately.
    pub async fn run_scheduled(&self, every: Duration) {
        info!(interval_secs = every.as_secs(), "pipeline schedule started");
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let report = self.run_once().await;
            if report.success() {
                info!(summary = %report.summary(), "scheduled run succeeded");
            } else {
                error!(summary = %report.summary(), "scheduled run failed");
            }
        }
    }
}

/// Production step executor wiring the real pipeline components.
///
/// Scrape and raw-load operate on today's date partition; detect and
/// detection-load operate on the whole media tree and exchange file, which
/// the idempotent load policies make safe across days.
pub struct PipelineSteps {
    ingestor: Ingestor,
    enricher: Enricher,
    warehouse: Warehouse,
    lake: Lake,
}

impl PipelineSteps {
    /// Wire the production components into a step executor.
    pub fn new(ingestor: Ingestor, enricher: Enricher, warehouse: Warehouse, lake: Lake) -> Self {
        Self {
            ingestor,
            enricher,
            warehouse,
            lake,
        }
    }
}

#[async_trait]
impl StepExecutor for PipelineSteps {
    async fn execute(&self, step: Step) -> Result<String> {
        match step {
            Step::Scrape => {
                let summary = self.ingestor.run(&lake::utc_partition_date()).await?;
                Ok(format!(
                    "{} messages across {} channels ({} failed), {} images",
                    summary.total_messages,
                    summary.channel_counts.len(),
                    summary.failed_channels.len(),
                    summary.images_downloaded,
                ))
            }
            Step::LoadRaw => {
                let report = self.warehouse.load_messages_from_lake(&self.lake, None)?;
                Ok(report.to_string())
            }
            Step::Detect => {
                let summary = self.enricher.run().await?;
                Ok(format!(
                    "{} records from {} images ({} failed)",
                    summary.records_written, summary.images_found, summary.images_failed,
                ))
            }
            Step::LoadDetections => {
                let report = self
                    .warehouse
                    .load_detections_from_csv(&self.lake.detections_csv_path())?;
                Ok(report.to_string())
            }
        }
    }
}
