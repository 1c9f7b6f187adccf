//! The concurrent, signature-aware DAG executor.
//!
//! The control loop (readiness tracking, signature updates, context
//! merges) runs single-threaded; substep bodies run as spawned tasks
//! bounded by a semaphore sized to the configured concurrency. Substeps
//! report back over a channel, so the context and the signature store
//! only ever have one writer.

use crate::action::{ActionOutcome, ActionRegistry, ActionRequest};
use crate::config::RunConfig;
use crate::context::ExecutionContext;
use crate::error::{ActionError, EngineError};
use crate::report::{RunReport, StepError, StepReport};
use crate::signature::{SignatureStore, TargetState};
use crate::target::{fingerprint_path, fingerprint_value, FingerprintMode, Target};
use crate::template;
use crate::types::{
    param_key, ParamSet, RunId, RunStatus, Step, StepId, StepState, WorkflowSpec,
};
use crate::workflow::dag::{consumed_targets, WorkflowDag};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Drives a workflow DAG to completion.
pub struct Executor {
    registry: Arc<ActionRegistry>,
    config: RunConfig,
}

/// What a finished substep sends back to the control loop.
struct SubstepCompletion {
    step: StepId,
    key: String,
    /// Input fingerprints observed at dispatch time, recorded on success.
    inputs: Vec<TargetState>,
    /// Declared outputs rendered against the substep namespace, so a
    /// fanned-out substep verifies and records its own artifacts.
    outputs: Vec<Target>,
    result: Result<ActionOutcome, ActionError>,
}

/// Control-loop bookkeeping for one step.
struct StepTracker {
    state: StepState,
    total: usize,
    skipped: usize,
    succeeded: usize,
    failed: usize,
    errors: Vec<String>,
}

impl StepTracker {
    fn new(total: usize) -> Self {
        Self {
            state: StepState::Pending,
            total,
            skipped: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    fn resolved(&self) -> usize {
        self.skipped + self.succeeded + self.failed
    }

    fn finalize(&mut self, error_tolerant: bool) {
        self.state = if self.failed == 0 {
            StepState::Succeeded
        } else if error_tolerant {
            StepState::SucceededWithErrors
        } else {
            StepState::Failed
        };
    }
}

impl Executor {
    pub fn new(registry: Arc<ActionRegistry>, config: RunConfig) -> Self {
        Self { registry, config }
    }

    /// Execute a workflow to completion and return the run summary. DAG
    /// construction errors abort before any execution; step failures are
    /// reported in the summary.
    pub async fn run(&self, workflow: &WorkflowSpec) -> Result<RunReport, EngineError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let workdir = self.config.workdir.clone();
        let mode = self.config.fingerprint;

        tracing::info!(%run_id, steps = workflow.steps.len(), "starting workflow run");

        let dag = WorkflowDag::build(workflow, &workdir)?;
        let mut store = SignatureStore::open(&workdir);
        let mut ctx = ExecutionContext::new(self.config.vars.clone());

        let order: Vec<StepId> = workflow.steps.iter().map(|s| s.id.clone()).collect();
        let mut trackers: HashMap<StepId, StepTracker> = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepTracker::new(s.param_sets().len())))
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<SubstepCompletion>();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut inflight: usize = 0;
        let mut aborting = false;

        loop {
            // Dispatch phase: repeat until no pending step becomes ready,
            // since skip-only and cascade resolutions unblock dependents
            // without going through the channel.
            while !aborting {
                let mut progress = false;
                for id in &order {
                    if aborting {
                        break;
                    }
                    if state_of(&trackers, id) != StepState::Pending {
                        continue;
                    }
                    let preds = dag.dependencies(id);
                    if !preds
                        .iter()
                        .all(|p| state_of(&trackers, p).is_terminal())
                    {
                        continue;
                    }

                    if let Some(failed) = preds
                        .iter()
                        .find(|p| state_of(&trackers, p) == StepState::Failed)
                    {
                        let message = format!("upstream step `{}` failed", failed);
                        mark_failed(&mut trackers, id, message);
                        progress = true;
                        continue;
                    }

                    let Some(step) = dag.step(id).cloned() else {
                        continue;
                    };

                    // A tolerated upstream failure only blocks consumers of
                    // the outputs it actually left missing.
                    if let Some(missing) =
                        missing_from_tolerated(&step, &preds, &trackers, &dag, &ctx, &workdir)
                    {
                        mark_failed(&mut trackers, id, missing);
                        if self.config.fail_fast {
                            aborting = true;
                        }
                        progress = true;
                        continue;
                    }

                    // Dispatch every substep of the ready step.
                    if let Some(t) = trackers.get_mut(id) {
                        t.state = StepState::Running;
                    }
                    tracing::info!(step = %id, substeps = step.param_sets().len(), "step ready");

                    for params in step.param_sets() {
                        // Fail-fast: once a failure triggers an abort, the
                        // step's remaining substeps stay undispatched.
                        if aborting {
                            break;
                        }
                        let key = param_key(&params);
                        let current_inputs = observe_inputs(&step, &ctx, &workdir, mode);

                        let skippable = current_inputs.as_ref().is_some_and(|inputs| {
                            store.is_unchanged(&step.id, &key, inputs, |t| {
                                t.resolved_path(&workdir)
                                    .and_then(|p| fingerprint_path(&p, mode))
                            })
                        });
                        if skippable {
                            tracing::debug!(step = %id, substep = %key, "signature unchanged, skipping");
                            if let Some(signature) = store.lookup(&step.id, &key) {
                                ctx.merge(signature.stored_vars());
                            }
                            if let Some(t) = trackers.get_mut(id) {
                                t.skipped += 1;
                            }
                            continue;
                        }

                        let namespace = substep_namespace(&step, &params, &ctx);
                        let prepared = self
                            .prepare_request(&step, &key, &namespace, &workdir)
                            .and_then(|request| {
                                let outputs = render_outputs(&step, &namespace)?;
                                let action = self.registry.get(&step.language)?;
                                Ok((request, outputs, action))
                            });
                        match prepared {
                            Ok((request, outputs, action)) => {
                                let tx = tx.clone();
                                let semaphore = semaphore.clone();
                                let completion_step = step.id.clone();
                                let completion_key = key.clone();
                                let inputs = current_inputs.unwrap_or_default();
                                inflight += 1;
                                tokio::spawn(async move {
                                    let _permit = semaphore
                                        .acquire_owned()
                                        .await
                                        .expect("executor semaphore closed");
                                    let result = action.execute(&request).await;
                                    let _ = tx.send(SubstepCompletion {
                                        step: completion_step,
                                        key: completion_key,
                                        inputs,
                                        outputs,
                                        result,
                                    });
                                });
                            }
                            Err(e) => {
                                self.fail_substep(&mut trackers, &step, e, &mut aborting);
                            }
                        }
                    }

                    // All substeps may have resolved without dispatching.
                    // An aborted step with a recorded failure is terminal
                    // even though some substeps never dispatched.
                    if let Some(t) = trackers.get_mut(id) {
                        if t.resolved() == t.total || (aborting && t.failed > 0) {
                            t.finalize(step.error_tolerant);
                            if t.state == StepState::Failed && self.config.fail_fast {
                                aborting = true;
                            }
                        }
                    }
                    progress = true;
                }
                if !progress {
                    break;
                }
            }

            let all_terminal = trackers.values().all(|t| t.state.is_terminal());
            if inflight == 0 && (aborting || all_terminal) {
                break;
            }

            let Some(completion) = rx.recv().await else {
                break;
            };
            inflight -= 1;
            self.process_completion(
                completion,
                &dag,
                &mut trackers,
                &mut store,
                &mut ctx,
                &workdir,
                &mut aborting,
            );
        }

        let report = self.build_report(
            run_id,
            started_at,
            &order,
            &dag,
            &trackers,
            &store,
            &ctx,
            &workdir,
        );
        if report.success() {
            tracing::info!(%run_id, executed = report.total_executed(), skipped = report.total_skipped(), "workflow run succeeded");
        } else {
            tracing::error!(%run_id, errors = report.errors.len(), "workflow run failed");
        }
        Ok(report)
    }

    /// Render the body and string options against the substep namespace
    /// and assemble the adapter request.
    fn prepare_request(
        &self,
        step: &Step,
        key: &str,
        namespace: &HashMap<String, serde_json::Value>,
        workdir: &Path,
    ) -> Result<ActionRequest, ActionError> {
        let body = template::render(&step.body, namespace)?;
        let mut options = BTreeMap::new();
        for (name, value) in &step.options {
            let rendered = match value {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(template::render(s, namespace)?)
                }
                other => other.clone(),
            };
            options.insert(name.clone(), rendered);
        }

        let inputs = step
            .inputs
            .iter()
            .filter_map(|t| t.resolved_path(workdir))
            .collect();

        Ok(ActionRequest {
            step: step.id.clone(),
            substep: key.to_string(),
            body,
            inputs,
            vars: namespace.clone(),
            options,
            workdir: workdir.to_path_buf(),
        })
    }

    /// Record a substep failure that happened before or instead of an
    /// action invocation.
    fn fail_substep(
        &self,
        trackers: &mut HashMap<StepId, StepTracker>,
        step: &Step,
        error: ActionError,
        aborting: &mut bool,
    ) {
        tracing::warn!(step = %step.id, error = %error, "substep failed");
        if let Some(t) = trackers.get_mut(&step.id) {
            t.failed += 1;
            t.errors.push(error.to_string());
        }
        if !step.error_tolerant && self.config.fail_fast {
            *aborting = true;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_completion(
        &self,
        completion: SubstepCompletion,
        dag: &WorkflowDag,
        trackers: &mut HashMap<StepId, StepTracker>,
        store: &mut SignatureStore,
        ctx: &mut ExecutionContext,
        workdir: &Path,
        aborting: &mut bool,
    ) {
        let Some(step) = dag.step(&completion.step).cloned() else {
            return;
        };
        let mode = self.config.fingerprint;

        let result = completion
            .result
            .and_then(|outcome| verify_outputs(&completion.outputs, outcome, workdir, mode));

        match result {
            Ok((outcome, outputs)) => {
                ctx.merge(outcome.vars);
                if let Err(e) = store.record(&step.id, &completion.key, completion.inputs, outputs)
                {
                    tracing::warn!(step = %step.id, error = %e, "failed to flush signature store");
                }
                if let Some(t) = trackers.get_mut(&step.id) {
                    t.succeeded += 1;
                }
                tracing::debug!(step = %step.id, substep = %completion.key, "substep succeeded");
            }
            Err(e) => {
                self.fail_substep(trackers, &step, e, aborting);
            }
        }

        if let Some(t) = trackers.get_mut(&step.id) {
            if t.resolved() == t.total && !t.state.is_terminal() {
                t.finalize(step.error_tolerant);
                if t.state == StepState::Failed && self.config.fail_fast {
                    *aborting = true;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        run_id: RunId,
        started_at: chrono::DateTime<Utc>,
        order: &[StepId],
        dag: &WorkflowDag,
        trackers: &HashMap<StepId, StepTracker>,
        store: &SignatureStore,
        ctx: &ExecutionContext,
        workdir: &Path,
    ) -> RunReport {
        let mut steps = Vec::new();
        let mut errors = Vec::new();
        let mut produced = Vec::new();
        let mut seen_produced: HashSet<Target> = HashSet::new();

        for id in order {
            let Some(tracker) = trackers.get(id) else {
                continue;
            };
            for message in &tracker.errors {
                errors.push(StepError {
                    step: id.clone(),
                    message: message.clone(),
                });
            }
            // Produced targets come from the recorded signatures, so a
            // fanned-out step reports its concrete per-substep artifacts
            // rather than the declared templates.
            if let Some(step) = dag.step(id) {
                if matches!(
                    tracker.state,
                    StepState::Succeeded | StepState::SucceededWithErrors
                ) {
                    for params in step.param_sets() {
                        let key = param_key(&params);
                        let Some(signature) = store.lookup(&step.id, &key) else {
                            continue;
                        };
                        for state in &signature.outputs {
                            if tracker.state == StepState::SucceededWithErrors
                                && !target_available(&state.target, ctx, workdir)
                            {
                                continue;
                            }
                            if seen_produced.insert(state.target.clone()) {
                                produced.push(state.target.clone());
                            }
                        }
                    }
                }
            }
            steps.push(StepReport {
                id: id.clone(),
                state: tracker.state,
                substeps: tracker.total,
                executed: tracker.succeeded + tracker.failed,
                skipped: tracker.skipped,
                failed: tracker.failed,
                error: tracker.errors.first().cloned(),
            });
        }

        let status = if trackers.values().any(|t| t.state == StepState::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        RunReport {
            run_id,
            status,
            started_at,
            completed_at: Utc::now(),
            steps,
            produced,
            errors,
        }
    }
}

fn state_of(trackers: &HashMap<StepId, StepTracker>, id: &StepId) -> StepState {
    trackers
        .get(id)
        .map(|t| t.state)
        .unwrap_or(StepState::Failed)
}

fn mark_failed(trackers: &mut HashMap<StepId, StepTracker>, id: &StepId, message: String) {
    tracing::warn!(step = %id, %message, "step cannot run");
    if let Some(t) = trackers.get_mut(id) {
        t.state = StepState::Failed;
        t.errors.push(message);
    }
}

/// Fingerprint the step's declared inputs right now. `None` when an input
/// cannot be observed (missing file, unpublished variable), which rules
/// out a skip but not execution.
fn observe_inputs(
    step: &Step,
    ctx: &ExecutionContext,
    workdir: &Path,
    mode: FingerprintMode,
) -> Option<Vec<TargetState>> {
    let mut states = Vec::new();
    for target in &step.inputs {
        match target {
            Target::File { .. } => {
                let path = target.resolved_path(workdir)?;
                let fingerprint = fingerprint_path(&path, mode)?;
                states.push(TargetState::new(target.clone(), fingerprint));
            }
            Target::Var { name } => {
                let value = ctx.get_var(name)?;
                states.push(TargetState::new(target.clone(), fingerprint_value(value)));
            }
            Target::StepRef { .. } => {}
        }
    }
    Some(states)
}

/// Variable snapshot a substep's body, options, and outputs render
/// against: the run context plus the step's own identity and parameters.
fn substep_namespace(
    step: &Step,
    params: &ParamSet,
    ctx: &ExecutionContext,
) -> HashMap<String, serde_json::Value> {
    let mut namespace = ctx.snapshot();
    namespace.insert(
        "step_name".to_string(),
        serde_json::Value::String(step.id.to_string()),
    );
    namespace.insert("step_index".to_string(), serde_json::json!(step.index));
    for (name, value) in params {
        namespace.insert(name.clone(), value.clone());
    }
    namespace
}

/// Render declared output targets against the substep namespace, so a
/// fanned-out substep owns outputs like `part_${i}.txt`.
fn render_outputs(step: &Step, namespace: &HashMap<String, serde_json::Value>) -> Result<Vec<Target>, ActionError> {
    step.outputs
        .iter()
        .map(|target| match target {
            Target::File { path } => {
                let rendered = template::render(&path.to_string_lossy(), namespace)?;
                Ok(Target::file(rendered))
            }
            Target::Var { name } => Ok(Target::var(template::render(name, namespace)?)),
            Target::StepRef { .. } => Ok(target.clone()),
        })
        .collect()
}

/// After an action reports success, every declared output must actually
/// exist; otherwise downstream consumers cannot be satisfied and the
/// substep fails. A declared variable must come from this substep's own
/// outcome; a same-named variable elsewhere in the run does not count.
fn verify_outputs(
    outputs: &[Target],
    outcome: ActionOutcome,
    workdir: &Path,
    mode: FingerprintMode,
) -> Result<(ActionOutcome, Vec<TargetState>), ActionError> {
    let mut states = Vec::new();
    for target in outputs {
        match target {
            Target::File { .. } => {
                let fingerprint = target
                    .resolved_path(workdir)
                    .and_then(|p| fingerprint_path(&p, mode))
                    .ok_or_else(|| ActionError::MissingOutput {
                        target: target.to_string(),
                    })?;
                states.push(TargetState::new(target.clone(), fingerprint));
            }
            Target::Var { name } => {
                let value = outcome
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ActionError::MissingOutput {
                        target: target.to_string(),
                    })?;
                states.push(
                    TargetState::new(target.clone(), fingerprint_value(&value)).with_value(value),
                );
            }
            Target::StepRef { .. } => {}
        }
    }
    Ok((outcome, states))
}

/// When a predecessor tolerated substep failures, its consumers may only
/// run if the specific targets they consume were still produced.
fn missing_from_tolerated(
    step: &Step,
    preds: &[StepId],
    trackers: &HashMap<StepId, StepTracker>,
    dag: &WorkflowDag,
    ctx: &ExecutionContext,
    workdir: &Path,
) -> Option<String> {
    for pred in preds {
        if state_of(trackers, pred) != StepState::SucceededWithErrors {
            continue;
        }
        let producer = dag.step(pred)?;
        for target in consumed_targets(step) {
            if !producer.outputs.contains(target) {
                continue;
            }
            if !target_available(target, ctx, workdir) {
                return Some(format!(
                    "step `{}` did not produce `{}` (tolerated failure)",
                    pred, target
                ));
            }
        }
    }
    None
}

fn target_available(target: &Target, ctx: &ExecutionContext, workdir: &Path) -> bool {
    match target {
        Target::File { .. } => target
            .resolved_path(workdir)
            .map(|p| p.exists())
            .unwrap_or(false),
        Target::Var { name } => ctx.has_var(name),
        Target::StepRef { .. } => true,
    }
}
