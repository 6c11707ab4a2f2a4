//! Submission results and cached PRT outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cas::CasValue;
use crate::error::{CasError, CasResult};
use crate::input::ValidationMessage;

/// How `process_input` treats the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    Normal,
    /// Automated exploration: the submission is treated as invalid and no PRT
    /// is evaluated.
    TestHarness,
    /// PRTs are evaluated but a proposed transition is never committed.
    Preview,
}

/// Per-scene-visit processing phase. Reset whenever a new scene is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenePhase {
    Uninitialized,
    Initialized,
    InputValidated,
    PrtsProcessed,
}

/// Evaluated PRT tuple `[path, feedback, score, penalty, next_scene?]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrtOutcome {
    elements: Vec<CasValue>,
}

impl PrtOutcome {
    pub fn from_value(value: CasValue) -> Option<Self> {
        match value {
            CasValue::List(elements) => Some(Self { elements }),
            _ => None,
        }
    }

    /// Parse a stored tuple.
    pub fn parse(stored: &str) -> CasResult<Self> {
        let value = CasValue::parse(stored)?;
        Self::from_value(value).ok_or_else(|| CasError::Parse {
            input: stored.to_string(),
            message: "PRT result is not a list".into(),
        })
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// A tuple shorter than four elements never reached a comparable result.
    pub fn is_complete(&self) -> bool {
        self.elements.len() >= 4
    }

    pub fn path(&self) -> Vec<String> {
        self.elements
            .first()
            .and_then(CasValue::as_string_list)
            .unwrap_or_default()
    }

    pub fn feedback(&self) -> &str {
        self.elements.get(1).and_then(CasValue::as_str).unwrap_or("")
    }

    pub fn score(&self) -> Option<f64> {
        self.elements.get(2).and_then(CasValue::as_f64)
    }

    pub fn penalty(&self) -> Option<f64> {
        self.elements.get(3).and_then(CasValue::as_f64)
    }

    /// Scene proposed by this PRT, if any.
    pub fn next_scene(&self) -> Option<&str> {
        self.elements.get(4).and_then(CasValue::as_str)
    }

    /// The storage form: feedback is rendered separately, so it is blanked.
    pub fn compact(&self) -> Self {
        let mut elements = self.elements.clone();
        if let Some(feedback) = elements.get_mut(1) {
            *feedback = CasValue::string("");
        }
        Self { elements }
    }

    pub fn serialize_compact(&self) -> String {
        self.compact().to_string()
    }
}

impl fmt::Display for PrtOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", CasValue::List(self.elements.clone()))
    }
}

/// What the engine remembers about one PRT in one scene visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "lowercase")]
pub enum PrtCacheEntry {
    /// Skipped, not wrong. Never overwrites an evaluated entry.
    NoEval,
    Evaluated(PrtOutcome),
}

impl PrtCacheEntry {
    pub fn outcome(&self) -> Option<&PrtOutcome> {
        match self {
            Self::NoEval => None,
            Self::Evaluated(outcome) => Some(outcome),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Nothing actionable happened.
    Todo,
    Invalid,
    Complete,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::Invalid => write!(f, "invalid"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTransition {
    pub from: String,
    pub to: String,
}

/// Outcome of one `process_input` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    pub summary: String,
    /// Scene-visit sequence number the PRT results belong to.
    pub sequence: usize,
    /// Scene the submission was made in.
    pub scene: String,
    pub prt_results: BTreeMap<String, PrtCacheEntry>,
    /// PRT feedback, only filled when requested.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feedback: BTreeMap<String, String>,
    pub validation: BTreeMap<String, ValidationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<SceneTransition>,
}

impl SubmissionResult {
    pub fn is_complete(&self) -> bool {
        self.status == SubmissionStatus::Complete
    }
}
