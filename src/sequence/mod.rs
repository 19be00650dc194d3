//! Ordered execution of deployment stages.
//!
//! Stages name their prerequisites explicitly; the executor sorts them
//! topologically, breaking ties by declaration order so the run order is fixed.
//! Stages then run strictly one after another.

use std::collections::{BTreeSet, HashMap};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::deployer::{DeployContext, Error};
use crate::poll;
use crate::stage::{FailurePolicy, RunOutcome, StageResult, StageSpec, StageStatus};

mod actions;
pub mod plan;

use actions::ActionOutcome;

/// Returns stage indices in execution order.
pub fn order(stages: &[StageSpec]) -> Result<Vec<usize>, Error> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, stage) in stages.iter().enumerate() {
        if index.insert(stage.name, i).is_some() {
            return Err(Error::InvalidPlan(format!("duplicate stage {}", stage.name)));
        }
    }

    let mut pending: Vec<usize> = vec![0; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        for prerequisite in &stage.after {
            let &p = index.get(prerequisite).ok_or_else(|| {
                Error::InvalidPlan(format!(
                    "stage {} depends on unknown stage {}",
                    stage.name, prerequisite
                ))
            })?;
            pending[i] += 1;
            dependents[p].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..stages.len()).filter(|&i| pending[i] == 0).collect();
    let mut ordered = Vec::with_capacity(stages.len());
    while let Some(next) = ready.pop_first() {
        ordered.push(next);
        for &d in &dependents[next] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if ordered.len() != stages.len() {
        let stuck: Vec<&str> = (0..stages.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| stages[i].name)
            .collect();
        return Err(Error::InvalidPlan(format!(
            "prerequisite cycle among {}",
            stuck.join(", ")
        )));
    }
    Ok(ordered)
}

pub struct Sequencer<'a> {
    cluster: &'a dyn Cluster,
    stages: Vec<StageSpec>,
    order: Vec<usize>,
}

impl<'a> Sequencer<'a> {
    pub fn new(cluster: &'a dyn Cluster, stages: Vec<StageSpec>) -> Result<Sequencer<'a>, Error> {
        let order = order(&stages)?;
        Ok(Sequencer {
            cluster,
            stages,
            order,
        })
    }

    /// Runs every stage. Only an `Abort` stage that fails to converge returns an error.
    pub async fn run(&self, ctx: &mut DeployContext) -> Result<RunOutcome, Error> {
        let mut outcome = RunOutcome::default();
        for &i in &self.order {
            let stage = &self.stages[i];
            let result = self.run_stage(stage, ctx).await;

            match &result.status {
                StageStatus::Completed => info!("Stage {} completed", stage.name),
                StageStatus::Skipped(reason) => info!("Stage {} skipped: {}", stage.name, reason),
                StageStatus::Degraded(detail) => {
                    warn!("Stage {} did not converge, continuing: {}", stage.name, detail)
                }
                StageStatus::Aborted(detail) => {
                    error!("Stage {} failed: {}", stage.name, detail);
                    return Err(Error::Aborted {
                        stage: stage.name.to_string(),
                        reason: detail.clone(),
                    });
                }
            }
            outcome.stages.push(result);
        }
        outcome.report = ctx.report.take();
        Ok(outcome)
    }

    async fn run_stage(&self, stage: &StageSpec, ctx: &mut DeployContext) -> StageResult {
        let started = Instant::now();
        let abort = stage.policy == FailurePolicy::Abort;
        let mut problems: Vec<String> = Vec::new();
        let mut skipped = None;

        info!("Stage {} starting", stage.name);
        if let Some(action) = &stage.action {
            match actions::execute(self.cluster, action, ctx).await {
                Ok(ActionOutcome::Done) => {}
                Ok(ActionOutcome::Skipped(reason)) => skipped = Some(reason),
                Err(e) => problems.push(format!("{}: {}", action, e)),
            }
        }

        // An abort stage stops at the first problem; others still observe their waits,
        // which may already hold from an earlier run.
        if !(abort && !problems.is_empty()) {
            for wait in &stage.waits {
                let result = poll::wait(self.cluster, wait).await;
                if result.is_ready() {
                    info!("{} after {:?}", wait.target(), result.elapsed);
                    continue;
                }
                problems.push(format!(
                    "{} {} after {:?} (last observed: {})",
                    wait.target(),
                    result.outcome,
                    result.elapsed,
                    result.last_observed
                ));
                if abort {
                    break;
                }
            }
        }

        let status = match (problems.is_empty(), abort, skipped) {
            (true, _, Some(reason)) => StageStatus::Skipped(reason),
            (true, _, None) => StageStatus::Completed,
            (false, true, _) => StageStatus::Aborted(problems.join("; ")),
            (false, false, _) => StageStatus::Degraded(problems.join("; ")),
        };
        StageResult {
            name: stage.name,
            status,
            elapsed: started.elapsed(),
        }
    }
}
