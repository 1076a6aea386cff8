//! Detector orchestrator
//!
//! Runs the enabled subset of registered detectors concurrently over one
//! text and folds their results into a [`Verdict`]:
//! - every evaluation runs as its own task and is bounded by its own
//!   timeout, never longer than the caller's deadline
//! - the orchestrator waits for all of them; it never stops at the first
//!   block, because every reason must be reported
//! - a detector that panics, times out, or is not registered becomes an
//!   `unavailable` result and a warning, never a block

use crate::config::DetectorConfig;
use crate::registry::DetectorRegistry;
use futures::FutureExt;
use parking_lot::Mutex;
use railguard_core::{
    Decision, DetectorOverride, DetectorOverrides, DetectorResult, DetectorSettings, Error,
    Phase, Result, Verdict,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Maximum number of texts in one batch request
pub const MAX_BATCH: usize = 20;

const TIMED_OUT: &str = "timed out";

struct Planned {
    name: String,
    settings: DetectorSettings,
}

/// Running totals for one detector since startup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectorUsage {
    pub name: String,
    pub evaluations: u64,
    pub blocks: u64,
    pub warnings: u64,
    pub unavailable: u64,
    pub mean_latency_us: u64,

    #[serde(skip)]
    total_latency_us: u64,
}

impl DetectorUsage {
    fn record(&mut self, result: &DetectorResult) {
        self.evaluations += 1;
        match result.decision {
            Decision::Block if result.is_blocking() => self.blocks += 1,
            Decision::Block | Decision::Warn => self.warnings += 1,
            Decision::Unavailable => self.unavailable += 1,
            Decision::Pass => {}
        }
        self.total_latency_us += result.latency_us;
        self.mean_latency_us = self.total_latency_us / self.evaluations;
    }
}

/// Concurrent fan-out over the detector registry
pub struct Orchestrator {
    registry: Arc<DetectorRegistry>,
    config: DetectorConfig,
    usage: Mutex<BTreeMap<String, DetectorUsage>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<DetectorRegistry>, config: DetectorConfig) -> Self {
        Self {
            registry,
            config,
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    /// Usage per registered detector, in registration order. Detectors
    /// never evaluated report zeros.
    pub fn usage(&self) -> Vec<DetectorUsage> {
        let usage = self.usage.lock();
        self.registry
            .names()
            .iter()
            .map(|name| {
                usage.get(name).cloned().unwrap_or_else(|| DetectorUsage {
                    name: name.clone(),
                    ..DetectorUsage::default()
                })
            })
            .collect()
    }

    fn record_usage(&self, results: &[DetectorResult]) {
        let mut usage = self.usage.lock();
        for result in results {
            usage
                .entry(result.detector.clone())
                .or_insert_with(|| DetectorUsage {
                    name: result.detector.clone(),
                    ..DetectorUsage::default()
                })
                .record(result);
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluate `text` with the named detectors.
    ///
    /// Names are evaluated in the given order (duplicates dropped) after
    /// `overrides` are merged over the configured defaults; disabled
    /// detectors are skipped. Fails only when the deadline has already
    /// passed or a mandatory detector produced no usable result.
    pub async fn evaluate(
        &self,
        text: &str,
        phase: Phase,
        detectors: &[String],
        overrides: &DetectorOverrides,
        deadline: Instant,
    ) -> Result<Verdict> {
        if text.trim().is_empty() {
            return Err(Error::invalid_request("text must not be empty"));
        }

        let plan = self.plan(detectors, overrides);
        if plan.is_empty() {
            return Ok(Verdict::pass(phase));
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::PipelineTimeout);
        }

        let text: Arc<str> = Arc::from(text);
        let mut slots: Vec<Option<DetectorResult>> = vec![None; plan.len()];
        let mut tasks = JoinSet::new();

        for (idx, entry) in plan.iter().enumerate() {
            let Some(detector) = self.registry.get(&entry.name) else {
                slots[idx] = Some(DetectorResult::unavailable(
                    &entry.name,
                    "not registered",
                    entry.settings.threshold,
                ));
                continue;
            };

            let task_deadline = entry
                .settings
                .timeout_ms
                .map(|ms| (now + Duration::from_millis(ms)).min(deadline))
                .unwrap_or(deadline);
            let text = Arc::clone(&text);
            let name = entry.name.clone();
            let settings = entry.settings;

            tasks.spawn(async move {
                let started = Instant::now();
                let evaluation = AssertUnwindSafe(detector.evaluate(&text, &settings)).catch_unwind();
                let mut result = match timeout_at(task_deadline, evaluation).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => {
                        warn!(detector = %name, "Detector panicked");
                        DetectorResult::unavailable(&name, "detector panicked", settings.threshold)
                    }
                    Err(_) => {
                        debug!(detector = %name, "Detector timed out");
                        DetectorResult::unavailable(&name, TIMED_OUT, settings.threshold)
                    }
                };

                let latency_us = started.elapsed().as_micros() as u64;
                metrics::histogram!("railguard_detector_latency_us", "detector" => name.clone())
                    .record(latency_us as f64);

                result.detector = name;
                result.threshold = settings.threshold;
                (idx, result.with_latency_us(latency_us))
            });
        }

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, result)) => slots[idx] = Some(result),
                    Err(e) => warn!(error = %e, "Detector task failed"),
                }
            }
        };
        if timeout_at(deadline, collect).await.is_err() {
            debug!(phase = %phase, "Deadline reached with detectors outstanding");
        }
        // Anything still running is aborted here.
        drop(tasks);

        let results: Vec<DetectorResult> = slots
            .into_iter()
            .zip(&plan)
            .map(|(slot, entry)| {
                slot.unwrap_or_else(|| {
                    DetectorResult::unavailable(&entry.name, TIMED_OUT, entry.settings.threshold)
                })
            })
            .collect();
        self.record_usage(&results);

        for (entry, result) in plan.iter().zip(&results) {
            if entry.settings.mandatory && result.decision == Decision::Unavailable {
                return Err(if result.details["reason"] == TIMED_OUT {
                    Error::DetectorTimeout(entry.name.clone())
                } else {
                    Error::DetectorUnavailable(entry.name.clone())
                });
            }
        }

        let verdict = aggregate(phase, results);
        debug!(
            phase = %phase,
            blocked = verdict.blocked,
            reasons = ?verdict.reasons,
            warnings = ?verdict.warnings,
            "Evaluation complete"
        );
        Ok(verdict)
    }

    /// Detection without the rail: evaluate with `detectors`, or every
    /// registered detector when `None`
    pub async fn detect(
        &self,
        text: &str,
        detectors: Option<&[String]>,
        overrides: &DetectorOverrides,
        deadline: Instant,
    ) -> Result<Verdict> {
        let names = detectors.unwrap_or_else(|| self.registry.names());
        self.evaluate(text, Phase::Input, names, overrides, deadline).await
    }

    /// Evaluate one registered detector, enabled regardless of config
    pub async fn test_detector(
        &self,
        name: &str,
        text: &str,
        threshold: Option<f32>,
        deadline: Instant,
    ) -> Result<DetectorResult> {
        if !self.registry.contains(name) {
            return Err(Error::invalid_request(format!("unknown detector '{name}'")));
        }

        if threshold.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
            return Err(Error::invalid_request("threshold must be within [0, 1]"));
        }

        let mut overrides = DetectorOverrides::new();
        overrides.insert(
            name.to_string(),
            DetectorOverride {
                enabled: Some(true),
                threshold,
            },
        );

        let mut verdict = self
            .evaluate(text, Phase::Input, &[name.to_string()], &overrides, deadline)
            .await?;
        verdict
            .breakdown
            .remove(name)
            .ok_or_else(|| Error::internal(format!("no result for '{name}'")))
    }

    /// Detect over up to [`MAX_BATCH`] texts concurrently
    pub async fn batch(
        &self,
        texts: &[String],
        detectors: Option<&[String]>,
        overrides: &DetectorOverrides,
        deadline: Instant,
    ) -> Result<Vec<Verdict>> {
        if texts.len() > MAX_BATCH {
            return Err(Error::invalid_request(format!(
                "at most {MAX_BATCH} texts per batch, got {}",
                texts.len()
            )));
        }

        futures::future::try_join_all(
            texts
                .iter()
                .map(|text| self.detect(text, detectors, overrides, deadline)),
        )
        .await
    }

    fn plan(&self, detectors: &[String], overrides: &DetectorOverrides) -> Vec<Planned> {
        let mut seen = HashSet::new();
        detectors
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| Planned {
                name: name.clone(),
                settings: self.config.effective(name, overrides),
            })
            .filter(|p| p.settings.enabled)
            .collect()
    }
}

/// Fold per-detector results into a verdict.
///
/// `results` must be in dispatch order; reasons and warnings keep it.
pub fn aggregate(phase: Phase, results: Vec<DetectorResult>) -> Verdict {
    let mut verdict = Verdict::pass(phase);

    for result in results {
        match result.decision {
            Decision::Block if result.is_blocking() => verdict.reasons.push(result.detector.clone()),
            Decision::Block | Decision::Warn => {
                verdict.warnings.push(format!("{} flagged", result.detector))
            }
            Decision::Unavailable => {
                verdict.warnings.push(format!("{} unavailable", result.detector))
            }
            Decision::Pass => {}
        }
        verdict.breakdown.insert(result.detector.clone(), result);
    }

    verdict.blocked = !verdict.reasons.is_empty();
    verdict
}
