//! Rich diagnostic error types for the stateful engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so question authors know
//! exactly what went wrong and where to look.
//!
//! Student input that fails validation is *not* an error: it is reported through
//! [`SubmissionStatus::Invalid`](crate::engine::SubmissionStatus::Invalid).

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the stateful engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum StatefulError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cas(#[from] CasError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Question(#[from] QuestionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Grade(#[from] GradeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// CAS gateway errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CasError {
    #[error("CAS transport error: {message}")]
    #[diagnostic(
        code(stateful::cas::transport),
        help(
            "The CAS evaluator could not be reached. Check the configured `cas.url` \
             and that the evaluator service is running."
        )
    )]
    Transport { message: String },

    #[error("CAS evaluator returned HTTP {code}: {body}")]
    #[diagnostic(
        code(stateful::cas::status),
        help("The evaluator rejected the batch. Inspect the response body for details.")
    )]
    Status { code: u16, body: String },

    #[error("failed to decode CAS response: {message}")]
    #[diagnostic(
        code(stateful::cas::decode),
        help("The evaluator response was not a valid result list. Check the evaluator version.")
    )]
    Decode { message: String },

    #[error("CAS evaluator reported an error: {message}")]
    #[diagnostic(
        code(stateful::cas::evaluator),
        help(
            "Symbolic evaluation failed for the whole batch. This points at an authoring \
             problem in the question; retrying will not help."
        )
    )]
    Evaluator { message: String },

    #[error("CAS returned {actual} results for a batch of {expected} statements")]
    #[diagnostic(
        code(stateful::cas::result_count),
        help("The evaluator must return exactly one result per submitted statement, in order.")
    )]
    ResultCount { expected: usize, actual: usize },

    #[error("cannot parse CAS literal `{input}`: {message}")]
    #[diagnostic(
        code(stateful::cas::parse),
        help(
            "Stored CAS values must be numbers, strings, booleans, or bracketed lists. \
             The stored value may be truncated or corrupted."
        )
    )]
    Parse { input: String, message: String },
}

/// Result type for CAS gateway operations.
pub type CasResult<T> = std::result::Result<T, CasError>;

// ---------------------------------------------------------------------------
// Question (scene graph) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QuestionError {
    #[error("question \"{question}\" defines no scenes")]
    #[diagnostic(
        code(stateful::question::no_scenes),
        help("Add at least one `[[scene]]` table to the question definition.")
    )]
    NoScenes { question: String },

    #[error("duplicate scene name \"{name}\"")]
    #[diagnostic(
        code(stateful::question::duplicate_scene),
        help("Scene names must be unique within a question.")
    )]
    DuplicateScene { name: String },

    #[error("entry scene \"{name}\" does not exist")]
    #[diagnostic(
        code(stateful::question::missing_entry),
        help("Set `entry_scene` to the name of one of the question's scenes.")
    )]
    MissingEntryScene { name: String },

    #[error("state variable {what} \"{value}\" is declared more than once")]
    #[diagnostic(
        code(stateful::question::duplicate_state_variable),
        help(
            "State variable identifiers are storage keys: they are assigned once and \
             never reused within a question."
        )
    )]
    DuplicateStateVariable { what: &'static str, value: String },

    #[error("\"{name}\" is a reserved name")]
    #[diagnostic(
        code(stateful::question::reserved_name),
        help("SCENE_CURRENT, SCENE_PATH, SCENE_NEXT and RANDOM_SEED are managed by the engine.")
    )]
    ReservedName { name: String },

    #[error("{what} name \"{name}\" is not a CAS identifier")]
    #[diagnostic(
        code(stateful::question::invalid_identifier),
        help(
            "Input, PRT and state variable names are bound in the CAS as-is. Use a \
             letter followed by letters, digits or underscores."
        )
    )]
    InvalidIdentifier { what: &'static str, name: String },

    #[error("state variable identifier {id} is out of range")]
    #[diagnostic(
        code(stateful::question::state_variable_id),
        help("State variable identifiers must be at most 2147483647.")
    )]
    StateVariableIdOutOfRange { id: u32 },

    #[error("input \"{input}\" in scene \"{scene}\" is {kind} and cannot have a teacher answer")]
    #[diagnostic(
        code(stateful::question::teacher_answer),
        help("Only algebraic inputs take a `teacher_answer`; remove it from this input.")
    )]
    UnsupportedTeacherAnswer {
        scene: String,
        input: String,
        kind: String,
    },

    #[error("scene \"{scene}\" declares {what} \"{name}\" more than once")]
    #[diagnostic(
        code(stateful::question::duplicate_member),
        help("Input and PRT names must be unique within their scene.")
    )]
    DuplicateMember {
        scene: String,
        what: &'static str,
        name: String,
    },

    #[error("PRT \"{prt}\" in scene \"{scene}\" has no nodes")]
    #[diagnostic(
        code(stateful::question::empty_prt),
        help("Every response tree needs at least one test node.")
    )]
    EmptyPrt { scene: String, prt: String },

    #[error("PRT \"{prt}\" in scene \"{scene}\" references missing node {target}")]
    #[diagnostic(
        code(stateful::question::unknown_node),
        help("Branch `next` and `first_node` must be indices into the PRT's node list.")
    )]
    UnknownNode {
        scene: String,
        prt: String,
        target: usize,
    },

    #[error("PRT \"{prt}\" in scene \"{scene}\" contains a cycle through node {node}")]
    #[diagnostic(
        code(stateful::question::prt_cycle),
        help("Response trees must be acyclic: every path has to reach a terminal branch.")
    )]
    PrtCycle {
        scene: String,
        prt: String,
        node: usize,
    },

    #[error("PRT \"{prt}\" in scene \"{scene}\" transitions to unknown scene \"{target}\"")]
    #[diagnostic(
        code(stateful::question::unknown_next_scene),
        help("`next_scene` must name a scene of the same question.")
    )]
    UnknownNextScene {
        scene: String,
        prt: String,
        target: String,
    },

    #[error("PRT \"{prt}\" in scene \"{scene}\" does not depend on any input")]
    #[diagnostic(
        code(stateful::question::prt_without_inputs),
        help("Reference at least one of the scene's inputs in a node's `sans` or `tans`.")
    )]
    PrtWithoutInputs { scene: String, prt: String },

    #[error("PRT \"{prt}\" in scene \"{scene}\" has invalid value {value}")]
    #[diagnostic(
        code(stateful::question::invalid_value),
        help("A PRT's value is its weight in the total mark and must be a finite number >= 0.")
    )]
    InvalidValue {
        scene: String,
        prt: String,
        value: f64,
    },

    #[error("invalid score mode \"{value}\"")]
    #[diagnostic(
        code(stateful::question::score_mode),
        help("Use one of `best`, `first`, `bestn[N]` (N >= 1) or `noscore`.")
    )]
    InvalidScoreMode { value: String },

    #[error("invalid default mark {value}")]
    #[diagnostic(
        code(stateful::question::default_mark),
        help("`default_mark` must be a finite number >= 0.")
    )]
    InvalidDefaultMark { value: f64 },

    #[error("failed to read question file: {path}")]
    #[diagnostic(
        code(stateful::question::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse question definition: {message}")]
    #[diagnostic(
        code(stateful::question::parse),
        help("Check the TOML/JSON syntax against the question schema.")
    )]
    Parse { message: String },
}

/// Result type for scene graph operations.
pub type QuestionResult<T> = std::result::Result<T, QuestionError>;

// ---------------------------------------------------------------------------
// Session compiler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("compiled session cache has no entry \"{key}\"")]
    #[diagnostic(
        code(stateful::compile::missing),
        help(
            "The session cache is out of date for this question. Recompile it with \
             `SessionCompiler::compile` after editing the question."
        )
    )]
    Missing { key: String },

    #[error("compiled entry \"{key}\" is not a {expected} entry")]
    #[diagnostic(
        code(stateful::compile::kind),
        help("The cache was produced by an incompatible compiler version.")
    )]
    WrongKind { key: String, expected: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Question(#[from] QuestionError),
}

/// Result type for session compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

// ---------------------------------------------------------------------------
// State store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("attempt state has no current scene")]
    #[diagnostic(
        code(stateful::state::no_scene),
        help("The attempt was never started. Call `Engine::start_attempt` first.")
    )]
    NoCurrentScene,

    #[error("malformed value for state key {key}: {message}")]
    #[diagnostic(
        code(stateful::state::malformed),
        help("The stored attempt state is corrupted or was written by an incompatible version.")
    )]
    Malformed { key: i32, message: String },

    #[error("failed to decode attempt snapshot: {message}")]
    #[diagnostic(
        code(stateful::state::snapshot),
        help("Attempt snapshots are JSON objects with `seed` and `values` fields.")
    )]
    Snapshot { message: String },
}

/// Result type for state store operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

/// Fatal failures of the execution core.
///
/// Both kinds leave the attempt state exactly as it was before the call.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    #[error("failed to initialize scene \"{scene}\": {message}")]
    #[diagnostic(
        code(stateful::execution::initialization),
        help(
            "Scene setup failed, so no submission can be processed until the question \
             definition is fixed. Check the scene's variables, text and teacher answers."
        )
    )]
    Initialization { scene: String, message: String },

    #[error("{stage} failed: {message}")]
    #[diagnostic(
        code(stateful::execution::processing),
        help(
            "A CAS batch failed while processing the submission. The submission was \
             rejected and the attempt state is unchanged."
        )
    )]
    Processing { stage: Stage, message: String },
}

impl ExecutionError {
    pub(crate) fn init(scene: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Initialization {
            scene: scene.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn processing(stage: Stage, message: impl std::fmt::Display) -> Self {
        Self::Processing {
            stage,
            message: message.to_string(),
        }
    }
}

/// The batch that was running when a [`ExecutionError::Processing`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StateInitialization,
    Validation,
    PrtEvaluation,
    Transition,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateInitialization => write!(f, "state-variable initialization"),
            Self::Validation => write!(f, "input validation"),
            Self::PrtEvaluation => write!(f, "PRT evaluation"),
            Self::Transition => write!(f, "scene transition"),
        }
    }
}

/// Result type for the execution core.
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

// ---------------------------------------------------------------------------
// Grading errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GradeError {
    #[error("scene path entry {index} names unknown scene \"{scene}\"")]
    #[diagnostic(
        code(stateful::grade::unknown_scene),
        help("The attempt history does not belong to this version of the question.")
    )]
    UnknownScene { index: usize, scene: String },

    #[error("stored result for PRT \"{prt}\" at path entry {index} is malformed: {message}")]
    #[diagnostic(
        code(stateful::grade::malformed_result),
        help("Stored PRT results are CAS lists `[path, feedback, score, penalty, ...]`.")
    )]
    MalformedResult {
        index: usize,
        prt: String,
        message: String,
    },
}

/// Result type for grading.
pub type GradeResult<T> = std::result::Result<T, GradeError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(stateful::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    #[diagnostic(
        code(stateful::config::parse),
        help("Check the TOML syntax in the engine config file.")
    )]
    Parse { message: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Convenience alias for functions returning stateful results.
pub type StatefulResult<T> = std::result::Result<T, StatefulError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_error_converts_to_stateful_error() {
        let err = CasError::Evaluator {
            message: "boom".into(),
        };
        let top: StatefulError = err.into();
        assert!(matches!(top, StatefulError::Cas(CasError::Evaluator { .. })));
    }

    #[test]
    fn compile_error_wraps_question_error() {
        let err: CompileError = QuestionError::MissingEntryScene {
            name: "entry".into(),
        }
        .into();
        assert!(matches!(
            err,
            CompileError::Question(QuestionError::MissingEntryScene { .. })
        ));
    }

    #[test]
    fn processing_error_names_stage() {
        let err = ExecutionError::processing(Stage::PrtEvaluation, "division by zero");
        let msg = err.to_string();
        assert!(msg.contains("PRT evaluation"));
        assert!(msg.contains("division by zero"));
    }
}
