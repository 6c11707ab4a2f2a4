//! End-to-end tests of the execution core against a scripted CAS.
//!
//! These walk an attempt through scene initialization, validation, PRT
//! evaluation and transitions, checking what is committed and what is not.

mod common;

use std::sync::Arc;

use common::{binds, prt_tuple, started_engine, FakeCas};
use stateful::cas::{BatchPurpose, CasValue};
use stateful::engine::{ExecutionMode, PrtCacheEntry, ScenePhase, SubmissionStatus};
use stateful::error::{ExecutionError, Stage};
use stateful::input::{InputStatus, Response};
use stateful::state::MemStateStore;

fn correct() -> Response {
    Response::new().with("ans1", "x^2+2*x+1")
}

fn position(batch: &stateful::cas::CasBatch, key: &str) -> usize {
    batch
        .statements
        .iter()
        .position(|s| s.key.as_deref() == Some(key))
        .unwrap_or_else(|| panic!("batch does not bind {key}"))
}

/// Move the attempt from `entry` to `second`.
fn advance_to_second(cas: &Arc<FakeCas>, engine: &mut stateful::engine::Engine) {
    cas.set("__prt_p1", prt_tuple("p1-0-T", "Correct.", 1.0, 0.0, Some("second")));
    let result = engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap();
    assert!(result.transition.is_some());
}

#[test]
fn start_attempt_seeds_state_and_enters_entry_scene() {
    let cas = FakeCas::new();
    let engine = started_engine(&cas);

    assert_eq!(engine.seed(), 42);
    let state = engine.get_state_array();
    assert_eq!(state["SCENE_CURRENT"], "\"entry\"");
    assert_eq!(state["SCENE_PATH"], "[]");
    assert_eq!(state["tries"], "0");
    assert_eq!(engine.get_state_variable_identifiers()[&1], "tries");

    assert_eq!(engine.scene_text(), Some("Expand {@p@}."));
    assert_eq!(engine.phase(), ScenePhase::Initialized);
    assert_eq!(cas.count(BatchPurpose::StateInitialization), 1);
    assert_eq!(cas.count(BatchPurpose::SceneInitialization), 1);
}

#[test]
fn scene_initialization_batch_follows_documented_order() {
    let cas = FakeCas::new();
    let _engine = started_engine(&cas);
    let batch = cas.last(BatchPurpose::SceneInitialization).unwrap();

    let seed = position(&batch, "RANDOM_SEED");
    let state_var = position(&batch, "tries");
    let current = position(&batch, "SCENE_CURRENT");
    let path = position(&batch, "SCENE_PATH");
    let text = position(&batch, "__scene_text");
    let teacher = position(&batch, "__tea_ans1");
    assert!(seed < state_var && state_var < current && current < path);
    assert!(path < text && text < teacher);

    let qv = batch
        .statements
        .iter()
        .position(|s| s.expr == "__question_variables()")
        .unwrap();
    assert!(seed < qv && qv < state_var);
    assert_eq!(batch.seed, 42);
}

#[test]
fn initialization_is_idempotent_per_scene() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    let text = engine.scene_text().map(str::to_string);

    engine.initialize_scene().unwrap();
    engine.initialize_scene().unwrap();
    assert_eq!(cas.count(BatchPurpose::SceneInitialization), 1);
    assert_eq!(engine.scene_text().map(str::to_string), text);

    // A fresh engine over the same state builds the identical batch.
    let snapshot = engine.snapshot();
    let first = cas.last(BatchPurpose::SceneInitialization).unwrap();
    let mut resumed = common::engine(&cas).with_state(snapshot.seed, Box::new(snapshot.restore()));
    resumed.initialize_scene().unwrap();
    let second = cas.last(BatchPurpose::SceneInitialization).unwrap();
    assert_eq!(first, second);
    assert_eq!(resumed.scene_text().map(str::to_string), text);
}

#[test]
fn correct_answer_scores_without_transition() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__prt_p1", prt_tuple("p1-0-T", "Correct.", 1.0, 0.0, None));

    let result = engine
        .process_input(&correct(), true, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Complete);
    assert_eq!(result.summary, "PRTs evaluated: p1");
    assert!(result.transition.is_none());
    assert_eq!(result.feedback["p1"], "Correct.");
    assert_eq!(result.prt_results["p2"], PrtCacheEntry::NoEval);
    let outcome = result.prt_results["p1"].outcome().unwrap();
    assert_eq!(outcome.score(), Some(1.0));
    assert_eq!(outcome.penalty(), Some(0.0));

    assert_eq!(
        engine.step_record(0)["p1"],
        r#"[["p1-0-T"],"",1,0,false]"#
    );
    assert_eq!(engine.phase(), ScenePhase::PrtsProcessed);
    assert_eq!(engine.current_scene().unwrap(), "entry");
    assert_eq!(engine.get_state_array()["tries"], "0");

    let report = engine.grade().unwrap();
    assert_eq!(report.weighted_sum, 1.0);
    assert_eq!(report.total, 0.5);
}

#[test]
fn feedback_is_only_returned_on_request() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__prt_p1", prt_tuple("p1-0-F", "Not quite.", 0.0, 0.1, None));

    let quiet = engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap();
    assert!(quiet.feedback.is_empty());
    assert!(quiet.prt_results["p1"].outcome().is_some());

    let loud = engine
        .process_input(&correct(), true, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(loud.feedback["p1"], "Not quite.");
}

#[test]
fn malformed_input_is_invalid_and_touches_nothing() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    let before = engine.get_state_array();

    let result = engine
        .process_input(&Response::new().with("ans1", "x+("), true, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Invalid);
    assert!(result.summary.starts_with("[INVALID]"));
    assert_eq!(result.validation["ans1"].status, InputStatus::Invalid);
    assert!(result
        .prt_results
        .values()
        .all(|entry| *entry == PrtCacheEntry::NoEval));
    assert_eq!(result.prt_results.len(), 2);
    assert_eq!(cas.count(BatchPurpose::PrtEvaluation), 0);
    assert_eq!(engine.get_state_array(), before);
}

#[test]
fn cas_rejection_makes_the_submission_invalid() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__val_ans1", CasValue::string("Unknown function `foo`."));

    assert!(!engine.validate_input(&Response::new().with("ans1", "foo(x)")).unwrap());
    let validation = cas.last(BatchPurpose::Validation).unwrap();
    let simp = validation
        .statements
        .iter()
        .position(|s| s.expr == "simp:false")
        .unwrap();
    assert!(simp < position(&validation, "__val_ans1"));

    let result = engine
        .process_input(&Response::new().with("ans1", "foo(x)"), false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Invalid);
    assert_eq!(
        result.validation["ans1"].errors,
        vec!["Unknown function `foo`.".to_string()]
    );
}

#[test]
fn test_harness_never_evaluates_prts() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);

    let result = engine
        .process_input(&correct(), false, ExecutionMode::TestHarness)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Invalid);
    assert!(result.summary.contains("test harness"));
    assert_eq!(result.prt_results["p1"], PrtCacheEntry::NoEval);
    assert_eq!(cas.count(BatchPurpose::PrtEvaluation), 0);
}

#[test]
fn blank_submission_is_todo() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);

    let result = engine
        .process_input(&Response::new(), false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Todo);
    assert!(result.summary.starts_with("[TODO]"));
    assert_eq!(cas.count(BatchPurpose::PrtEvaluation), 0);
}

#[test]
fn only_prts_with_valid_inputs_are_evaluated() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);

    let result = engine
        .process_input(&Response::new().with("ans2", "0"), false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Complete);
    assert_eq!(result.prt_results["p1"], PrtCacheEntry::NoEval);
    assert!(result.prt_results["p2"].outcome().is_some());

    let batch = cas.last(BatchPurpose::PrtEvaluation).unwrap();
    assert!(binds(&batch, "__prt_p2"));
    assert!(!binds(&batch, "__prt_p1"));
}

#[test]
fn prt_batch_toggles_simplification_around_invocations() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap();

    let batch = cas.last(BatchPurpose::PrtEvaluation).unwrap();
    let call = position(&batch, "__prt_p1");
    assert_eq!(batch.statements[call - 1].expr, "simp:false");
    let restore = batch
        .statements
        .iter()
        .rposition(|s| s.expr == "simp:true")
        .unwrap();
    assert!(call < restore);
    assert!(restore < position(&batch, "SCENE_NEXT"));
    assert!(position(&batch, "SCENE_NEXT") < position(&batch, "__scene_path_next"));
    assert!(binds(&batch, "__sv_tries"));
    assert!(binds(&batch, "ans1"));
}

#[test]
fn noeval_never_overwrites_an_evaluated_result() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__prt_p1", prt_tuple("p1-0-T", "", 1.0, 0.0, None));
    engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap();
    engine
        .process_input(&Response::new().with("ans1", "x+"), false, ExecutionMode::Normal)
        .unwrap();

    assert!(matches!(
        engine.prt_result(0, "p1"),
        Some(PrtCacheEntry::Evaluated(_))
    ));
}

#[test]
fn transition_appends_exactly_the_exited_scene() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__sv_tries", CasValue::Number(1.0));
    cas.set("__prt_p1", prt_tuple("p1-0-T", "Correct.", 1.0, 0.0, Some("second")));
    let path_before = engine.scene_path().unwrap();

    let result = engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Complete);
    assert_eq!(result.summary, "[INPUT CAUSED STATE CHANGE] entry -> second");
    let transition = result.transition.unwrap();
    assert_eq!((transition.from.as_str(), transition.to.as_str()), ("entry", "second"));
    assert_eq!(result.sequence, 0);

    let path_after = engine.scene_path().unwrap();
    assert_eq!(path_after.len(), path_before.len() + 1);
    assert_eq!(path_after, vec!["entry".to_string()]);
    assert_eq!(engine.current_scene().unwrap(), "second");
    assert_eq!(engine.sequence().unwrap(), 1);
    assert_eq!(engine.get_state_array()["tries"], "1");
    assert_eq!(engine.scene_text(), Some("Evaluate at x = 1."));

    // The same response was re-validated against the new scene's inputs.
    assert_eq!(result.validation["ans1"].status, InputStatus::Invalid);
    assert!(!result.validation.contains_key("ans2"));
}

#[test]
fn preview_evaluates_but_never_moves() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__sv_tries", CasValue::Number(5.0));
    cas.set("__prt_p1", prt_tuple("p1-0-T", "", 1.0, 0.0, Some("second")));

    let result = engine
        .process_input(&correct(), false, ExecutionMode::Preview)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Complete);
    assert!(result.summary.starts_with("[PREVIEW]"));
    assert!(result.transition.is_none());
    assert_eq!(engine.current_scene().unwrap(), "entry");
    assert_eq!(engine.get_state_array()["tries"], "0");
    assert!(engine.prt_result(0, "p1").unwrap().outcome().is_some());
}

#[test]
fn failed_prt_batch_commits_nothing() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__prt_p1", prt_tuple("p1-0-T", "", 1.0, 0.0, Some("second")));
    cas.fail_on(Some(BatchPurpose::PrtEvaluation));
    let before = engine.get_state_array();

    let err = engine
        .process_input(&correct(), true, ExecutionMode::Normal)
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Processing {
            stage: Stage::PrtEvaluation,
            ..
        }
    ));
    assert_eq!(engine.get_state_array(), before);
    assert!(engine.prt_result(0, "p1").is_none());
    assert!(engine.step_record(0).is_empty());
}

#[test]
fn unknown_next_scene_is_a_processing_error() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("SCENE_NEXT", CasValue::string("nowhere"));
    let before = engine.get_state_array();

    let err = engine
        .process_input(&correct(), false, ExecutionMode::Normal)
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Processing {
            stage: Stage::Transition,
            ..
        }
    ));
    assert_eq!(engine.get_state_array(), before);
}

#[test]
fn rewritten_scene_path_is_rejected() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    cas.set("__prt_p1", prt_tuple("p1-0-T", "", 1.0, 0.0, Some("second")));
    cas.set("__scene_path_next", CasValue::string_list(["second", "entry"]));
    let before = engine.get_state_array();

    assert!(matches!(
        engine.process_input(&correct(), false, ExecutionMode::Normal),
        Err(ExecutionError::Processing {
            stage: Stage::Transition,
            ..
        })
    ));
    assert_eq!(engine.get_state_array(), before);
}

#[test]
fn must_verify_requires_the_echoed_value() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    advance_to_second(&cas, &mut engine);
    let validations = cas.count(BatchPurpose::Validation);

    let unconfirmed = engine
        .process_input(&Response::new().with("ans1", "4"), false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(unconfirmed.status, SubmissionStatus::Invalid);
    assert_eq!(unconfirmed.validation["ans1"].status, InputStatus::Unconfirmed);

    assert!(engine
        .validate_input(&Response::new().with("ans1", "4").with("ans1_val", "4"))
        .unwrap());
    // Numerical inputs are decided locally.
    assert_eq!(cas.count(BatchPurpose::Validation), validations);
}

#[test]
fn end_scene_completes_without_prt_evaluation() {
    let cas = FakeCas::new();
    let mut engine = started_engine(&cas);
    advance_to_second(&cas, &mut engine);

    cas.set("__prt_p1", prt_tuple("p1-0-T", "", 1.0, 0.0, Some("done")));
    let confirmed = Response::new().with("ans1", "4").with("ans1_val", "4");
    let result = engine
        .process_input(&confirmed, false, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.transition.unwrap().to, "done");
    assert_eq!(engine.scene_path().unwrap(), vec!["entry", "second"]);

    let evaluations = cas.count(BatchPurpose::PrtEvaluation);
    let result = engine
        .process_input(&confirmed, true, ExecutionMode::Normal)
        .unwrap();
    assert_eq!(result.status, SubmissionStatus::Complete);
    assert_eq!(result.summary, "[END]");
    assert!(result.prt_results.is_empty());
    assert_eq!(cas.count(BatchPurpose::PrtEvaluation), evaluations);

    // Both scored PRTs reached full marks on their first try.
    let report = engine.grade().unwrap();
    assert_eq!(report.weighted_sum, 2.0);
    assert_eq!(report.total, 1.0);
    assert_eq!(engine.history().visits().len(), 3);
}

#[test]
fn scene_initialization_failure_is_fatal() {
    let cas = FakeCas::new();
    cas.fail_on(Some(BatchPurpose::SceneInitialization));
    let mut engine = common::engine(&cas);

    let err = engine.start_attempt(Some(1)).unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Initialization { ref scene, .. } if scene == "entry"
    ));
    assert_eq!(engine.phase(), ScenePhase::Uninitialized);
}

#[test]
fn state_initialization_failure_leaves_the_store_empty() {
    let cas = FakeCas::new();
    cas.fail_on(Some(BatchPurpose::StateInitialization));
    let mut engine = common::engine(&cas);

    assert!(matches!(
        engine.start_attempt(Some(1)),
        Err(ExecutionError::Processing {
            stage: Stage::StateInitialization,
            ..
        })
    ));
    assert!(engine.get_state_array().is_empty());
}

#[test]
fn submitting_before_start_is_an_initialization_error() {
    let cas = FakeCas::new();
    let mut engine = common::engine(&cas).with_state(7, Box::new(MemStateStore::new()));
    assert!(matches!(
        engine.process_input(&correct(), false, ExecutionMode::Normal),
        Err(ExecutionError::Initialization { .. })
    ));
}
