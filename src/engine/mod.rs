//! Execution core: one submission at a time through the scene state machine.
//!
//! Per scene visit the engine moves `uninitialized → initialized →
//! input-validated → PRTs-processed`. A submission either ends `invalid`,
//! `todo` or `complete`, the latter possibly with a scene transition. Fatal
//! CAS failures surface as [`ExecutionError`]; attempt state is only written
//! after the batch that justifies the write has fully succeeded.

mod batch;
pub mod outcome;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cas::{CasEvaluator, CasResponse, CasValue};
use crate::compile::{keys, CompiledStore};
use crate::config::EngineConfig;
use crate::error::{ExecutionError, ExecutionResult, GradeResult, Stage, StateResult};
use crate::grade::{AttemptHistory, GradeReport};
use crate::input::{InputSet, Response};
use crate::question::{Question, SceneId};
use crate::state::{self, AttemptSnapshot, MemStateStore, StateKey, StateStore};

pub use outcome::{
    ExecutionMode, PrtCacheEntry, PrtOutcome, ScenePhase, SceneTransition, SubmissionResult,
    SubmissionStatus,
};

pub const SUMMARY_INVALID: &str = "[INVALID]";
pub const SUMMARY_END: &str = "[END]";
pub const SUMMARY_TODO: &str = "[TODO]";
pub const SUMMARY_STATE_CHANGE: &str = "[INPUT CAUSED STATE CHANGE]";
pub const SUMMARY_PREVIEW: &str = "[PREVIEW]";

/// The scene currently loaded into the engine.
#[derive(Debug)]
struct ActiveScene {
    id: SceneId,
    name: String,
    inputs: InputSet,
    text: Option<String>,
    model_solution: Option<String>,
    question_model_solution: Option<String>,
    phase: ScenePhase,
}

/// A transition that has been checked and is ready to be written.
struct PendingCommit {
    to: String,
    path: Vec<String>,
    values: Vec<(StateKey, String)>,
}

/// Drives one attempt of one question.
///
/// The question, its compiled cache and the CAS gateway are shared; the state
/// store belongs to this attempt alone.
pub struct Engine {
    question: Arc<Question>,
    cache: Arc<dyn CompiledStore>,
    cas: Arc<dyn CasEvaluator>,
    config: EngineConfig,
    seed: u64,
    store: Box<dyn StateStore>,
    active: Option<ActiveScene>,
    prt_results: BTreeMap<String, PrtCacheEntry>,
    history: AttemptHistory,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("question", &self.question.name)
            .field("seed", &self.seed)
            .field("store", &self.store)
            .field("active", &self.active.as_ref().map(|a| &a.name))
            .field("prt_results", &self.prt_results.len())
            .finish()
    }
}

impl Engine {
    /// Create an engine with an empty in-memory store. Call
    /// [`Engine::start_attempt`] before submitting anything.
    pub fn new(
        question: Arc<Question>,
        cache: Arc<dyn CompiledStore>,
        cas: Arc<dyn CasEvaluator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            question,
            cache,
            cas,
            config,
            seed: 0,
            store: Box::new(MemStateStore::new()),
            active: None,
            prt_results: BTreeMap::new(),
            history: AttemptHistory::new(),
        }
    }

    /// Resume an attempt from previously persisted state.
    pub fn with_state(mut self, seed: u64, store: Box<dyn StateStore>) -> Self {
        self.seed = seed;
        self.store = store;
        self.active = None;
        self.prt_results.clear();
        self.history = AttemptHistory::new();
        self
    }

    /// Resume from a snapshot, keeping the recorded history for grading.
    pub fn with_snapshot(self, snapshot: &AttemptSnapshot, history: AttemptHistory) -> Self {
        let mut engine = self.with_state(snapshot.seed, Box::new(snapshot.restore()));
        engine.history = history;
        engine
    }

    /// Seed a fresh attempt: evaluate every state variable's initial value,
    /// enter the entry scene, and initialize it. Returns the seed used.
    pub fn start_attempt(&mut self, seed: Option<u64>) -> ExecutionResult<u64> {
        let seed = seed.unwrap_or_else(rand::random);
        let fail = |e: &dyn std::fmt::Display| {
            ExecutionError::processing(Stage::StateInitialization, e)
        };

        let batch = self
            .state_initialization_batch(seed)
            .map_err(|e| fail(&e))?;
        let response = self.run(&batch).map_err(|e| fail(&e))?;

        let mut values = Vec::with_capacity(self.question.state_variables.len());
        for sv in &self.question.state_variables {
            let value = response.get(&sv.name).ok_or_else(|| {
                fail(&format!("no value for state variable `{}`", sv.name))
            })?;
            values.push((StateKey::from(sv.id), value.to_cas()));
        }

        self.seed = seed;
        for (key, value) in values {
            self.store.set(key, value);
        }
        self.store.set(
            StateKey::SCENE_CURRENT,
            state::encode_scene_name(&self.question.entry_scene),
        );
        self.store
            .set(StateKey::SCENE_PATH, state::encode_scene_path::<&str>(&[]));
        self.active = None;
        self.prt_results.clear();
        self.history = AttemptHistory::new();

        tracing::info!(
            question = %self.question.name,
            seed,
            entry = %self.question.entry_scene,
            "attempt started"
        );
        self.initialize_scene()?;
        Ok(seed)
    }

    /// Load the scene named by `SCENE_CURRENT`. A no-op if that scene is
    /// already initialized.
    pub fn initialize_scene(&mut self) -> ExecutionResult<()> {
        let name = state::scene_current(self.store.as_ref())
            .map_err(|e| ExecutionError::init("SCENE_CURRENT", e))?;
        if self.active.as_ref().is_some_and(|a| a.name == name) {
            return Ok(());
        }

        let question = Arc::clone(&self.question);
        let id = question
            .scene_id(&name)
            .ok_or_else(|| ExecutionError::init(&name, "scene is not defined in this question"))?;
        let scene = question.scene(id);
        let path =
            state::scene_path(self.store.as_ref()).map_err(|e| ExecutionError::init(&name, e))?;

        let mut inputs = InputSet::from_declarations(&scene.inputs);
        let batch = self
            .scene_initialization_batch(scene, inputs.initialisation_statements())
            .map_err(|e| ExecutionError::init(&name, e))?;
        let response = self
            .run(&batch)
            .map_err(|e| ExecutionError::init(&name, e))?;
        inputs.apply_initialisation(&response);

        let text = |key: &str| {
            response
                .get(key)
                .and_then(CasValue::as_str)
                .map(str::to_string)
        };
        self.active = Some(ActiveScene {
            id,
            name: name.clone(),
            inputs,
            text: text(keys::SCENE_TEXT),
            model_solution: text(keys::SCENE_MODEL_SOLUTION),
            question_model_solution: text(keys::QUESTION_MODEL_SOLUTION),
            phase: ScenePhase::Initialized,
        });
        self.history.sync_path(&path, &name);

        tracing::debug!(scene = %name, sequence = path.len(), "scene initialized");
        Ok(())
    }

    /// Validate every input of the active scene against `response`.
    ///
    /// True iff every non-blank input is valid and, where required, confirmed.
    pub fn validate_input(&mut self, response: &Response) -> ExecutionResult<bool> {
        self.initialize_scene()?;
        let fail = |e: &dyn std::fmt::Display| ExecutionError::processing(Stage::Validation, e);

        let active = self.active.as_mut().ok_or_else(not_initialized)?;
        let statements = active.inputs.validate(response, &self.config.security);
        let scene = active.name.clone();

        if !statements.is_empty() {
            let batch = self
                .validation_batch(&scene, statements)
                .map_err(|e| fail(&e))?;
            let results = self.run(&batch).map_err(|e| fail(&e))?;
            self.active_mut()?.inputs.apply_validation(&results);
        }

        let active = self.active_mut()?;
        active.phase = ScenePhase::InputValidated;
        let valid = active.inputs.all_valid();
        tracing::debug!(scene = %scene, valid, inputs = %active.inputs.summary(), "inputs validated");
        Ok(valid)
    }

    /// Render validation displays for the active scene's inputs.
    fn render_validation(&mut self) -> ExecutionResult<()> {
        let active = self.active.as_mut().ok_or_else(not_initialized)?;
        let statements = active.inputs.display_statements();
        if statements.is_empty() {
            return Ok(());
        }
        let scene = active.name.clone();
        let fail = |e: &dyn std::fmt::Display| ExecutionError::processing(Stage::Validation, e);
        let batch = self
            .validation_batch(&scene, statements)
            .map_err(|e| fail(&e))?;
        let results = self.run(&batch).map_err(|e| fail(&e))?;
        self.active_mut()?.inputs.apply_display(&results);
        Ok(())
    }

    /// Process one submission.
    pub fn process_input(
        &mut self,
        response: &Response,
        want_feedback: bool,
        mode: ExecutionMode,
    ) -> ExecutionResult<SubmissionResult> {
        self.initialize_scene()?;
        let question = Arc::clone(&self.question);
        let (scene_id, current) = {
            let active = self.active.as_ref().ok_or_else(not_initialized)?;
            (active.id, active.name.clone())
        };
        let scene = question.scene(scene_id);
        let old_path = state::scene_path(self.store.as_ref())
            .map_err(|e| ExecutionError::processing(Stage::PrtEvaluation, e))?;
        let sequence = old_path.len();

        // Step 0: gate on validity and terminal scenes.
        let valid = self.validate_input(response)?;
        if !valid || mode == ExecutionMode::TestHarness {
            self.mark_all_noeval(sequence, scene.prts.iter().map(|p| p.name.as_str()));
            self.render_validation()?;
            let detail = if valid {
                "test harness: PRTs not evaluated".to_string()
            } else {
                self.active_inputs()?.summary()
            };
            tracing::debug!(scene = %current, sequence, "submission invalid");
            return self.finish(
                SubmissionStatus::Invalid,
                format!("{SUMMARY_INVALID} {detail}"),
                sequence,
                &current,
                BTreeMap::new(),
                None,
            );
        }
        if scene.is_end_scene() {
            self.mark_all_noeval(sequence, scene.prts.iter().map(|p| p.name.as_str()));
            return self.finish(
                SubmissionStatus::Complete,
                SUMMARY_END.to_string(),
                sequence,
                &current,
                BTreeMap::new(),
                None,
            );
        }

        // Step 1: applicability.
        let mut applicable = Vec::new();
        let mut skipped = Vec::new();
        for prt in &scene.prts {
            let required = self
                .cache
                .inputs(&keys::prt_inputs_key(&current, &prt.name))
                .map_err(|e| ExecutionError::processing(Stage::PrtEvaluation, e))?;
            if self.active_inputs()?.has_valid_for(required) {
                applicable.push(prt.name.clone());
            } else {
                skipped.push(prt.name.clone());
            }
        }

        // Step 5: nothing to evaluate.
        if applicable.is_empty() {
            self.mark_all_noeval(sequence, skipped.iter().map(String::as_str));
            self.render_validation()?;
            let detail = self.active_inputs()?.summary();
            return self.finish(
                SubmissionStatus::Todo,
                format!("{SUMMARY_TODO} {detail}"),
                sequence,
                &current,
                BTreeMap::new(),
                None,
            );
        }

        // Step 2: one batch for every applicable PRT.
        let fail = |e: &dyn std::fmt::Display| ExecutionError::processing(Stage::PrtEvaluation, e);
        let (values, display) = {
            let active = self.active.as_mut().ok_or_else(not_initialized)?;
            (active.inputs.cas_values(), active.inputs.display_statements())
        };
        let batch = self
            .prt_batch(&current, &applicable, values, display)
            .map_err(|e| fail(&e))?;
        let results = self.run(&batch).map_err(|e| fail(&e))?;

        // Step 3: read every result before touching anything.
        let mut outcomes = Vec::with_capacity(applicable.len());
        for prt in &applicable {
            let value = results
                .get(&keys::prt_result(prt))
                .cloned()
                .ok_or_else(|| fail(&format!("PRT `{prt}` returned no result")))?;
            let outcome = PrtOutcome::from_value(value)
                .ok_or_else(|| fail(&format!("PRT `{prt}` did not return a list")))?;
            outcomes.push((prt.clone(), outcome));
        }

        // Step 4: decide on the transition, still without writing.
        let proposed = self.proposed_scene(&results)?;
        let commit = match (&proposed, mode) {
            (Some(to), ExecutionMode::Normal) => {
                Some(self.prepare_commit(&results, to, &current, &old_path)?)
            }
            _ => None,
        };

        // Everything checked: record results.
        let mut feedback = BTreeMap::new();
        let mut record = BTreeMap::new();
        for (prt, outcome) in outcomes {
            if want_feedback {
                feedback.insert(prt.clone(), outcome.feedback().to_string());
            }
            record.insert(prt.clone(), outcome.serialize_compact());
            self.prt_results.insert(
                keys::prt_cache_key(sequence, &prt),
                PrtCacheEntry::Evaluated(outcome),
            );
        }
        self.mark_all_noeval(sequence, skipped.iter().map(String::as_str));
        self.history.record(sequence, &current, record);
        {
            let active = self.active_mut()?;
            active.inputs.apply_display(&results);
            active.phase = ScenePhase::PrtsProcessed;
        }

        let Some(commit) = commit else {
            let mut summary = format!("PRTs evaluated: {}", applicable.join(", "));
            if let Some(to) = &proposed {
                summary = format!("{SUMMARY_PREVIEW} {summary}; would move to `{to}`");
            }
            return self.finish(
                SubmissionStatus::Complete,
                summary,
                sequence,
                &current,
                feedback,
                None,
            );
        };

        for (key, value) in &commit.values {
            self.store.set(*key, value.clone());
        }
        self.store
            .set(StateKey::SCENE_PATH, state::encode_scene_path(&commit.path));
        self.store
            .set(StateKey::SCENE_CURRENT, state::encode_scene_name(&commit.to));
        tracing::info!(from = %current, to = %commit.to, sequence, "scene transition committed");

        // The new scene may reuse input names with different meaning, so the
        // same response is validated again against its inputs.
        self.initialize_scene()?;
        self.validate_input(response)?;
        self.render_validation()?;

        let transition = SceneTransition {
            from: current.clone(),
            to: commit.to.clone(),
        };
        self.finish(
            SubmissionStatus::Complete,
            format!("{SUMMARY_STATE_CHANGE} {} -> {}", transition.from, transition.to),
            sequence,
            &current,
            feedback,
            Some(transition),
        )
    }

    fn proposed_scene(&self, results: &CasResponse) -> ExecutionResult<Option<String>> {
        let fail = |message: String| ExecutionError::processing(Stage::Transition, message);
        let Some(next) = results.get(keys::SCENE_NEXT) else {
            return Err(fail("SCENE_NEXT was not evaluated".into()));
        };
        if next.is_false() {
            return Ok(None);
        }
        let name = next
            .as_str()
            .ok_or_else(|| fail(format!("SCENE_NEXT is not a scene name: {next}")))?;
        if self.question.scene_id(name).is_none() {
            return Err(fail(format!("SCENE_NEXT names unknown scene `{name}`")));
        }
        Ok(Some(name.to_string()))
    }

    fn prepare_commit(
        &self,
        results: &CasResponse,
        to: &str,
        current: &str,
        old_path: &[String],
    ) -> ExecutionResult<PendingCommit> {
        let fail = |message: String| ExecutionError::processing(Stage::Transition, message);

        let path = results
            .get(keys::SCENE_PATH_NEXT)
            .and_then(CasValue::as_string_list)
            .ok_or_else(|| fail("updated scene path is missing or malformed".into()))?;
        let append_only = path.len() == old_path.len() + 1
            && path[..old_path.len()] == *old_path
            && path.last().map(String::as_str) == Some(current);
        if !append_only {
            return Err(fail(format!(
                "updated scene path {path:?} is not {old_path:?} followed by `{current}`"
            )));
        }

        let mut values = Vec::with_capacity(self.question.state_variables.len());
        for sv in &self.question.state_variables {
            let value = results
                .get(&keys::state_passthrough(&sv.name))
                .ok_or_else(|| fail(format!("state variable `{}` was not passed through", sv.name)))?;
            values.push((StateKey::from(sv.id), value.to_cas()));
        }

        Ok(PendingCommit {
            to: to.to_string(),
            path,
            values,
        })
    }

    /// Mark PRTs as skipped for `sequence` without overwriting evaluated results.
    fn mark_all_noeval<'a>(&mut self, sequence: usize, prts: impl Iterator<Item = &'a str>) {
        for prt in prts {
            self.prt_results
                .entry(keys::prt_cache_key(sequence, prt))
                .or_insert(PrtCacheEntry::NoEval);
        }
    }

    fn finish(
        &self,
        status: SubmissionStatus,
        summary: String,
        sequence: usize,
        scene: &str,
        feedback: BTreeMap<String, String>,
        transition: Option<SceneTransition>,
    ) -> ExecutionResult<SubmissionResult> {
        let prt_results: BTreeMap<String, PrtCacheEntry> = self
            .question
            .scene_by_name(scene)
            .map(|s| {
                s.prts
                    .iter()
                    .filter_map(|p| {
                        self.prt_result(sequence, &p.name)
                            .map(|entry| (p.name.clone(), entry.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SubmissionResult {
            status,
            summary,
            sequence,
            scene: scene.to_string(),
            prt_results,
            feedback,
            validation: self.active_inputs()?.validation_messages(),
            transition,
        })
    }

    fn active_mut(&mut self) -> ExecutionResult<&mut ActiveScene> {
        self.active.as_mut().ok_or_else(not_initialized)
    }

    fn active_inputs(&self) -> ExecutionResult<&InputSet> {
        self.active
            .as_ref()
            .map(|a| &a.inputs)
            .ok_or_else(not_initialized)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_scene(&self) -> StateResult<String> {
        state::scene_current(self.store.as_ref())
    }

    pub fn scene_path(&self) -> StateResult<Vec<String>> {
        state::scene_path(self.store.as_ref())
    }

    /// Number of transitions so far; qualifies cached PRT results.
    pub fn sequence(&self) -> StateResult<usize> {
        Ok(self.scene_path()?.len())
    }

    /// Processing phase of the loaded scene.
    pub fn phase(&self) -> ScenePhase {
        self.active
            .as_ref()
            .map_or(ScenePhase::Uninitialized, |a| a.phase)
    }

    pub fn scene_text(&self) -> Option<&str> {
        self.active.as_ref()?.text.as_deref()
    }

    pub fn scene_model_solution(&self) -> Option<&str> {
        self.active.as_ref()?.model_solution.as_deref()
    }

    pub fn question_model_solution(&self) -> Option<&str> {
        self.active.as_ref()?.question_model_solution.as_deref()
    }

    pub fn inputs(&self) -> Option<&InputSet> {
        self.active.as_ref().map(|a| &a.inputs)
    }

    pub fn prt_result(&self, sequence: usize, prt: &str) -> Option<&PrtCacheEntry> {
        self.prt_results.get(&keys::prt_cache_key(sequence, prt))
    }

    /// Compact stored tuples of every PRT evaluated during visit `sequence`.
    pub fn step_record(&self, sequence: usize) -> BTreeMap<String, String> {
        let prefix = keys::prt_cache_key(sequence, "");
        self.prt_results
            .iter()
            .filter_map(|(key, entry)| {
                let prt = key.strip_prefix(&prefix)?;
                let outcome = entry.outcome()?;
                Some((prt.to_string(), outcome.serialize_compact()))
            })
            .collect()
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }

    /// Grade the attempt so far using the configured penalty setting.
    pub fn grade(&self) -> GradeResult<GradeReport> {
        crate::grade::grade_report(
            &self.question,
            self.history.visits(),
            self.config.apply_penalties,
        )
    }

    /// Stored state by name: `SCENE_CURRENT`, `SCENE_PATH`, and every state
    /// variable that has a value.
    pub fn get_state_array(&self) -> BTreeMap<String, String> {
        self.store
            .values()
            .into_iter()
            .map(|(key, value)| {
                let name = match key {
                    StateKey::SCENE_CURRENT => keys::SCENE_CURRENT.to_string(),
                    StateKey::SCENE_PATH => keys::SCENE_PATH.to_string(),
                    StateKey(id) => u32::try_from(id)
                        .ok()
                        .and_then(|id| self.question.state_variable(id))
                        .map(|v| v.name.clone())
                        .unwrap_or_else(|| id.to_string()),
                };
                (name, value)
            })
            .collect()
    }

    pub fn get_state_variable_identifiers(&self) -> BTreeMap<u32, String> {
        self.question.state_variable_identifiers()
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot::capture(self.seed, self.store.as_ref())
    }
}

fn not_initialized() -> ExecutionError {
    ExecutionError::init("SCENE_CURRENT", "no scene has been initialized")
}
