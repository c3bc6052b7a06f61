//! Pipeline Driver
//!
//! Walks every registered unit in order and, for each unit, every step of its
//! registry in order. A step runs unless the unit does not support it, or it
//! is skippable, already recorded done, and not forced.
//!
//! - `Done` is recorded in the completion record
//! - `Deferred` is logged and left unrecorded; the run continues
//! - `Failed` stops the run
//!
//! Units left out of an `--only` selection still run their non-skippable
//! steps, so the search paths later units depend on are in place, and their
//! failures are reported without stopping the run.

use crate::builder::{perform, UnitBuilder};
use crate::env::BuildEnv;
use crate::error::{BuildError, Result};
use crate::outcome::StepOutcome;
use crate::process_guard::interrupted;
use crate::registry::BuilderRegistry;
use crate::state::StateStore;
use crate::steps::{StepAction, StepCode, StepDescriptor};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Unit key → step codes the user forces to run again
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedSteps {
    by_unit: BTreeMap<String, String>,
}

impl ForcedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `codes` for `key`, adding to any codes already forced
    pub fn insert(&mut self, key: impl Into<String>, codes: &str) {
        let entry = self.by_unit.entry(key.into()).or_default();
        for c in codes.chars() {
            if !entry.contains(c) {
                entry.push(c);
            }
        }
    }

    pub fn codes(&self, key: &str) -> &str {
        self.by_unit.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn is_forced(&self, key: &str, code: StepCode) -> bool {
        self.codes(key).contains(code.as_char())
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    /// Every key must be registered and every code must belong to the
    /// registry of its unit's kind
    pub fn validate(&self, registry: &BuilderRegistry) -> Result<()> {
        for (key, codes) in &self.by_unit {
            let unit = registry
                .get(key)
                .ok_or_else(|| BuildError::UnknownUnit(key.clone()))?;
            let steps = unit.kind().registry();
            if let Some(bad) = steps.find_unknown(codes) {
                return Err(BuildError::config(format!(
                    "Unknown step '{}' for {} (valid: {})",
                    bad,
                    key,
                    steps.codes()
                )));
            }
        }
        Ok(())
    }
}

/// Why a step was not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The unit does not support this step
    Unsupported,
    /// Recorded done in an earlier run and not forced
    AlreadyDone,
    /// Unit left out of the `--only` selection
    NotSelected,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "not supported"),
            Self::AlreadyDone => write!(f, "already done"),
            Self::NotSelected => write!(f, "not selected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Run,
    Skip(SkipReason),
}

/// Decide whether `step` runs for a unit.
pub fn decide(
    step: &StepDescriptor,
    supported: bool,
    done: bool,
    forced: bool,
    selected: bool,
) -> StepDecision {
    if !supported {
        return StepDecision::Skip(SkipReason::Unsupported);
    }
    if !step.skippable {
        return StepDecision::Run;
    }
    if !selected {
        return StepDecision::Skip(SkipReason::NotSelected);
    }
    if done && !forced {
        return StepDecision::Skip(SkipReason::AlreadyDone);
    }
    StepDecision::Run
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub code: StepCode,
    pub action: StepAction,
    pub decision: StepDecision,
    /// `None` when skipped or in dry-run mode
    pub outcome: Option<StepOutcome>,
}

/// Steps of one unit in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub key: String,
    pub steps: Vec<StepRecord>,
    /// A failure was tolerated because the unit was not selected
    pub abandoned: bool,
}

impl UnitReport {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            steps: Vec::new(),
            abandoned: false,
        }
    }

    /// Codes of the steps that were run (or would run in dry-run mode)
    pub fn ran(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.decision == StepDecision::Run)
            .map(|s| s.code.as_char())
            .collect()
    }

    /// Codes of the steps that completed
    pub fn done(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.outcome.as_ref().is_some_and(StepOutcome::is_done))
            .map(|s| s.code.as_char())
            .collect()
    }

    /// Codes of the steps that were deferred
    pub fn deferred(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.outcome.as_ref().is_some_and(StepOutcome::is_deferred))
            .map(|s| s.code.as_char())
            .collect()
    }
}

/// Everything a run did, unit by unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn unit(&self, key: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.key == key)
    }

    /// Units with at least one deferred step
    pub fn pending(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|u| !u.deferred().is_empty())
            .map(|u| u.key.as_str())
            .collect()
    }

    /// Units abandoned after a tolerated failure
    pub fn abandoned(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|u| u.abandoned)
            .map(|u| u.key.as_str())
            .collect()
    }
}

/// Drives a [`BuilderRegistry`] against a completion record
pub struct Pipeline<'r> {
    registry: &'r BuilderRegistry,
    forced: ForcedSteps,
    only: Option<BTreeSet<String>>,
    dry_run: bool,
}

impl<'r> Pipeline<'r> {
    pub fn new(registry: &'r BuilderRegistry) -> Self {
        Self {
            registry,
            forced: ForcedSteps::new(),
            only: None,
            dry_run: false,
        }
    }

    pub fn with_forced(mut self, forced: ForcedSteps) -> Self {
        self.forced = forced;
        self
    }

    /// Restrict skippable steps to the listed unit keys
    pub fn with_only<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check `--only` keys against the registry
    pub fn validate(&self) -> Result<()> {
        self.forced.validate(self.registry)?;
        if let Some(only) = &self.only {
            if let Some(unknown) = only.iter().find(|key| !self.registry.contains(key)) {
                return Err(BuildError::UnknownUnit(unknown.clone()));
            }
        }
        Ok(())
    }

    fn is_selected(&self, key: &str) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(key))
    }

    /// Run every unit. Stops at the first failure of a selected unit.
    pub fn run(&self, env: &mut BuildEnv, state: &mut StateStore) -> Result<RunReport> {
        let mut report = RunReport {
            units: Vec::with_capacity(self.registry.len()),
            dry_run: self.dry_run,
        };

        for entry in self.registry.iter() {
            let key = entry.key();
            let selected = self.is_selected(key);
            let mut builder = entry.build(env)?;
            let mut unit_report = UnitReport::new(key);
            info!("==== {} ====", key);

            for step in builder.registry().steps() {
                if interrupted() {
                    return Err(BuildError::Interrupted);
                }

                let decision = decide(
                    step,
                    builder.supports(step.code),
                    state.is_done(key, step.code),
                    self.forced.is_forced(key, step.code),
                    selected,
                );
                let mut record = StepRecord {
                    code: step.code,
                    action: step.action,
                    decision,
                    outcome: None,
                };

                if let StepDecision::Skip(reason) = decision {
                    debug!("{}: skipping {} ({})", key, step, reason);
                    unit_report.steps.push(record);
                    continue;
                }
                if self.dry_run {
                    info!("{}: would run {}", key, step);
                    unit_report.steps.push(record);
                    continue;
                }

                info!("{}: {}", key, step);
                let outcome = invoke(builder.as_mut(), step.action, env, key);
                record.outcome = Some(outcome.clone());
                unit_report.steps.push(record);

                match outcome {
                    StepOutcome::Done => {
                        state.mark_done(key, step.code);
                    }
                    StepOutcome::Deferred(reason) => {
                        warn!("{}: {} deferred: {}", key, step.action, reason);
                    }
                    StepOutcome::Failed(reason) => {
                        if interrupted() {
                            return Err(BuildError::Interrupted);
                        }
                        if !selected {
                            warn!(
                                "{}: {} failed ({}), unit not selected, abandoning it",
                                key, step.action, reason
                            );
                            unit_report.abandoned = true;
                            break;
                        }
                        error!("{}: {} failed: {}", key, step.action, reason);
                        return Err(BuildError::step_failed(key, step.action.to_string(), reason));
                    }
                }
            }

            report.units.push(unit_report);
        }

        Ok(report)
    }
}

/// Run one action, turning errors and panics into `Failed`
fn invoke(
    builder: &mut dyn UnitBuilder,
    action: StepAction,
    env: &mut BuildEnv,
    key: &str,
) -> StepOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| perform(builder, action, env))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!("{}: {} raised an error: {}", key, action, e);
            StepOutcome::failed(e.to_string())
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{}: {} panicked: {}", key, action, message);
            StepOutcome::failed(format!("panicked: {}", message))
        }
    }
}
