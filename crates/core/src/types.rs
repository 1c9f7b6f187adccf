use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One parameter combination for a substep. Ordered so that the derived
/// substep key is deterministic.
pub type ParamSet = BTreeMap<String, serde_json::Value>;

/// Derive the signature key for one parameter combination. The empty
/// parameter set maps to the empty key (the step's single substep).
pub fn param_key(params: &ParamSet) -> String {
    if params.is_empty() {
        return String::new();
    }
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_string(params).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Terminal-or-not state of a whole step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    /// An error-tolerant step with at least one failed substep.
    SucceededWithErrors,
    Failed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::SucceededWithErrors | StepState::Failed
        )
    }
}

/// State of one substep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstepState {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed,
}

impl SubstepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubstepState::Skipped | SubstepState::Succeeded | SubstepState::Failed
        )
    }
}

/// A declared unit of work: a language-tagged body plus the targets it
/// consumes and produces. Built once by the script model and never mutated
/// by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// Position in declaration order; also the scheduling tie-break.
    pub index: usize,
    pub language: String,
    pub body: String,
    #[serde(default)]
    pub inputs: Vec<Target>,
    #[serde(default)]
    pub outputs: Vec<Target>,
    /// Ordering-only dependencies, no data flow.
    #[serde(default)]
    pub depends: Vec<Target>,
    /// Parameter combinations; non-empty fans the step out into substeps.
    #[serde(default)]
    pub params: Vec<ParamSet>,
    /// Adapter options such as `output` templates or explicit `input`
    /// overrides.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    /// Substep failures do not fail the run for error-tolerant steps.
    #[serde(default)]
    pub error_tolerant: bool,
}

impl Step {
    pub fn new(
        index: usize,
        id: impl Into<String>,
        language: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: StepId::new(id),
            index,
            language: language.into(),
            body: body.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends: Vec::new(),
            params: Vec::new(),
            options: BTreeMap::new(),
            error_tolerant: false,
        }
    }

    pub fn with_input(mut self, target: Target) -> Self {
        self.inputs.push(target);
        self
    }

    pub fn with_output(mut self, target: Target) -> Self {
        self.outputs.push(target);
        self
    }

    pub fn with_depends(mut self, target: Target) -> Self {
        self.depends.push(target);
        self
    }

    pub fn with_params(mut self, params: Vec<ParamSet>) -> Self {
        self.params = params;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn error_tolerant(mut self) -> Self {
        self.error_tolerant = true;
        self
    }

    /// The parameter combinations to instantiate: the declared sets, or the
    /// single empty set when the step has no parameters.
    pub fn param_sets(&self) -> Vec<ParamSet> {
        if self.params.is_empty() {
            vec![ParamSet::new()]
        } else {
            self.params.clone()
        }
    }
}

/// The structured script model consumed by the engine: steps in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub steps: Vec<Step>,
}

impl WorkflowSpec {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}
