//! CAS evaluator gateway.
//!
//! The computer-algebra system is an external collaborator. The core hands it
//! an ordered [`CasBatch`] of statements and gets back one [`CasOutput`] per
//! statement, in order. Bindings made by earlier statements are visible to
//! later ones within the same batch; nothing survives between batches.

pub mod http;
pub mod value;

use serde::{Deserialize, Serialize};

pub use value::CasValue;

use crate::error::{CasError, CasResult};

/// One statement in a batch, optionally bound to a result key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasStatement {
    /// Name the evaluated result is reported under. Keyed statements are
    /// sent as `key:expr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub expr: String,
}

impl CasStatement {
    /// A statement whose result the core will read back under `key`.
    pub fn keyed(key: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            expr: expr.into(),
        }
    }

    /// A statement evaluated only for its side effects.
    pub fn bare(expr: impl Into<String>) -> Self {
        Self {
            key: None,
            expr: expr.into(),
        }
    }

    /// Toggle automatic simplification for the statements that follow.
    pub fn simp(enabled: bool) -> Self {
        Self::bare(format!("simp:{enabled}"))
    }

    /// The statement as CAS input text.
    pub fn to_cas(&self) -> String {
        match &self.key {
            Some(key) => format!("{key}:{}", self.expr),
            None => self.expr.clone(),
        }
    }
}

/// Why a batch was sent. Carried for logging and for evaluator-side routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPurpose {
    StateInitialization,
    SceneInitialization,
    Validation,
    PrtEvaluation,
}

impl std::fmt::Display for BatchPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateInitialization => write!(f, "state-initialization"),
            Self::SceneInitialization => write!(f, "scene-initialization"),
            Self::Validation => write!(f, "validation"),
            Self::PrtEvaluation => write!(f, "prt-evaluation"),
        }
    }
}

/// Batch-wide evaluation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasOptions {
    /// Localisation language for rendered text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Initial value of `simp` for the batch.
    #[serde(default)]
    pub simp: bool,
}

/// An ordered batch of statements evaluated in one shared scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasBatch {
    pub purpose: BatchPurpose,
    pub seed: u64,
    pub options: CasOptions,
    pub statements: Vec<CasStatement>,
}

impl CasBatch {
    pub fn new(purpose: BatchPurpose, seed: u64, options: CasOptions) -> Self {
        Self {
            purpose,
            seed,
            options,
            statements: Vec::new(),
        }
    }

    pub fn push(&mut self, statement: CasStatement) {
        self.statements.push(statement);
    }

    pub fn extend<I: IntoIterator<Item = CasStatement>>(&mut self, statements: I) {
        self.statements.extend(statements);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Evaluation result for a single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CasValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl CasOutput {
    pub fn ok(key: Option<String>, value: CasValue) -> Self {
        Self {
            key,
            value: Some(value),
            errors: Vec::new(),
        }
    }

    pub fn failed(key: Option<String>, error: impl Into<String>) -> Self {
        Self {
            key,
            value: None,
            errors: vec![error.into()],
        }
    }
}

/// Per-statement results for a whole batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasResponse {
    pub results: Vec<CasOutput>,
}

impl CasResponse {
    /// The value bound to `key`. If a key was bound more than once the last
    /// binding wins, matching evaluation order.
    pub fn get(&self, key: &str) -> Option<&CasValue> {
        self.results
            .iter()
            .rev()
            .find(|r| r.key.as_deref() == Some(key))
            .and_then(|r| r.value.as_ref())
    }

    /// All statement-level errors, prefixed with the statement key when known.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| {
                r.errors.iter().map(move |e| match &r.key {
                    Some(key) => format!("{key}: {e}"),
                    None => e.clone(),
                })
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|r| !r.errors.is_empty())
    }

    /// Turn statement-level errors into a single batch-level failure and
    /// check the result count matches the batch.
    pub fn checked(self, batch: &CasBatch) -> CasResult<Self> {
        if self.results.len() != batch.len() {
            return Err(CasError::ResultCount {
                expected: batch.len(),
                actual: self.results.len(),
            });
        }
        if self.has_errors() {
            return Err(CasError::Evaluator {
                message: self.errors().join("; "),
            });
        }
        Ok(self)
    }
}

/// The CAS evaluator gateway.
///
/// Evaluation is synchronous, order-preserving and side-effect free from the
/// core's point of view. Implementations must not retry: a failed symbolic
/// evaluation is deterministic.
pub trait CasEvaluator: Send + Sync {
    /// Evaluate a batch, returning per-statement results or a batch-level error.
    fn evaluate(&self, batch: &CasBatch) -> CasResult<CasResponse>;
}

impl<F> CasEvaluator for F
where
    F: Fn(&CasBatch) -> CasResult<CasResponse> + Send + Sync,
{
    fn evaluate(&self, batch: &CasBatch) -> CasResult<CasResponse> {
        self(batch)
    }
}
