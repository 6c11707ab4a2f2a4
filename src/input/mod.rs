//! Input subsystem protocol.
//!
//! Each scene owns a set of named, independently validated inputs. The
//! execution core only relies on the [`Input`] contract: validate the raw
//! response, report validity, and supply a CAS value. Optional behaviour is
//! exposed through capability traits ([`TeacherAnswer`], [`ValidationDisplay`])
//! that an input either implements or not; callers ask via the `as_*` methods.

pub mod algebraic;
pub mod boolean;
pub mod numerical;
pub mod set;
pub mod string;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cas::{CasResponse, CasStatement, CasValue};
use crate::compile::keys;

pub use set::InputSet;

/// Raw submitted field values, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(BTreeMap<String, String>);

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Response {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Name of the echo field carrying the last validated value of `input`.
pub fn verification_field(input: &str) -> String {
    format!("{input}_val")
}

/// Restrictions on what students may type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRules {
    /// Identifiers that make an expression invalid.
    #[serde(default = "default_forbidden_words")]
    pub forbidden_words: Vec<String>,
    /// Identifiers permitted even if listed as forbidden.
    #[serde(default)]
    pub allowed_words: Vec<String>,
    /// Maximum raw input length in characters.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
}

fn default_forbidden_words() -> Vec<String> {
    [
        "system", "eval", "ev", "kill", "batch", "batchload", "load", "loadfile",
        "writefile", "save", "stringout", "opena", "openw", "openr", "parse_string",
        "eval_string", "compile", "translate", "declare", "remvalue", "SCENE_CURRENT",
        "SCENE_PATH", "SCENE_NEXT", "RANDOM_SEED",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_input_length() -> usize {
    2000
}

impl Default for SecurityRules {
    fn default() -> Self {
        Self {
            forbidden_words: default_forbidden_words(),
            allowed_words: Vec::new(),
            max_input_length: default_max_input_length(),
        }
    }
}

impl SecurityRules {
    /// Whether `word` may appear in student input, given extra per-input bans.
    pub fn permits(&self, word: &str, extra_forbidden: &[String]) -> bool {
        if self.allowed_words.iter().any(|w| w == word) {
            return true;
        }
        !self
            .forbidden_words
            .iter()
            .chain(extra_forbidden)
            .any(|w| w == word)
    }
}

/// Kinds of input the engine can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Algebraic,
    Numerical,
    String,
    Boolean,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Algebraic => write!(f, "algebraic"),
            Self::Numerical => write!(f, "numerical"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// Authoring-time declaration of one input in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
    /// CAS expression for the model answer, evaluated at scene start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_answer: Option<String>,
    /// Require a second submission echoing the validated value.
    #[serde(default)]
    pub must_verify: bool,
    /// Identifiers forbidden for this input in addition to the global rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbid_words: Vec<String>,
    /// Algebraic only: fractions must be in lowest terms.
    #[serde(default)]
    pub lowest_terms: bool,
    /// Numerical only: inclusive bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl InputDeclaration {
    pub fn new(name: impl Into<String>, kind: InputKind) -> Self {
        Self {
            name: name.into(),
            kind,
            teacher_answer: None,
            must_verify: false,
            forbid_words: Vec::new(),
            lowest_terms: false,
            min: None,
            max: None,
        }
    }
}

/// Where an input stands after the latest validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputStatus {
    /// Nothing was submitted.
    Blank,
    /// Local checks passed; waiting for the CAS verdict.
    Pending,
    Invalid,
    /// Valid, but the two-step confirmation has not been given yet.
    Unconfirmed,
    Valid,
}

impl fmt::Display for InputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => write!(f, "blank"),
            Self::Pending => write!(f, "pending"),
            Self::Invalid => write!(f, "invalid"),
            Self::Unconfirmed => write!(f, "unconfirmed"),
            Self::Valid => write!(f, "valid"),
        }
    }
}

/// What the student sees next to an input after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub status: InputStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// The core per-input contract.
pub trait Input: fmt::Debug + Send {
    fn name(&self) -> &str;

    fn kind(&self) -> InputKind;

    /// Parse this input's portion of `response`, running local checks.
    ///
    /// Returns the CAS statements needed to finish validation; an empty list
    /// means the verdict is already final.
    fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement>;

    /// Deliver the results of the statements returned by [`Input::validate`].
    fn apply_validation(&mut self, results: &CasResponse);

    fn status(&self) -> InputStatus;

    fn is_valid(&self) -> bool {
        self.status() == InputStatus::Valid
    }

    fn is_blank(&self) -> bool {
        self.status() == InputStatus::Blank
    }

    /// Binding of the input's name to its CAS value, when valid.
    fn value(&self) -> Option<CasStatement>;

    /// Response fields this input reads.
    fn expected_field_names(&self) -> Vec<String>;

    fn validation_message(&self) -> ValidationMessage;

    fn as_teacher_answer(&mut self) -> Option<&mut dyn TeacherAnswer> {
        None
    }

    fn as_validation_display(&mut self) -> Option<&mut dyn ValidationDisplay> {
        None
    }
}

/// Capability: the input has a teacher answer evaluated at scene start.
pub trait TeacherAnswer {
    fn initialisation_statements(&self) -> Vec<CasStatement>;

    fn apply_initialisation(&mut self, results: &CasResponse);

    fn teacher_value(&self) -> Option<&CasValue>;
}

/// Capability: the input's validation display is rendered by the CAS.
pub trait ValidationDisplay {
    /// Statements rendering the display; empty unless the input is pending or valid.
    fn display_statements(&self) -> Vec<CasStatement>;

    fn apply_display(&mut self, results: &CasResponse);
}

/// Build the input described by `decl`.
pub fn build_input(decl: &InputDeclaration) -> Box<dyn Input> {
    match decl.kind {
        InputKind::Algebraic => Box::new(algebraic::AlgebraicInput::new(decl.clone())),
        InputKind::Numerical => Box::new(numerical::NumericalInput::new(decl.clone())),
        InputKind::String => Box::new(string::StringInput::new(decl.clone())),
        InputKind::Boolean => Box::new(boolean::BooleanInput::new(decl.clone())),
    }
}

/// State shared by every input kind: the captured raw value, the echo field,
/// the verdict, and the evaluated teacher answer.
#[derive(Debug, Clone)]
pub(crate) struct InputCore {
    pub decl: InputDeclaration,
    pub raw: Option<String>,
    pub echo: Option<String>,
    pub status: InputStatus,
    pub errors: Vec<String>,
    pub display: Option<String>,
    pub teacher_value: Option<CasValue>,
}

impl InputCore {
    pub fn new(decl: InputDeclaration) -> Self {
        Self {
            decl,
            raw: None,
            echo: None,
            status: InputStatus::Blank,
            errors: Vec::new(),
            display: None,
            teacher_value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Reset and read this input's fields. Returns the trimmed raw value, or
    /// `None` (with status `Blank`) if nothing was entered.
    pub fn capture(&mut self, response: &Response, security: &SecurityRules) -> Option<String> {
        self.raw = None;
        self.errors.clear();
        self.display = None;
        self.status = InputStatus::Blank;
        self.echo = response
            .get(&verification_field(&self.decl.name))
            .map(|s| s.trim().to_string());

        let raw = response.get(&self.decl.name)?.trim();
        if raw.is_empty() {
            return None;
        }
        self.raw = Some(raw.to_string());
        if raw.chars().count() > security.max_input_length {
            self.reject(format!(
                "Your answer is longer than {} characters.",
                security.max_input_length
            ));
            return None;
        }
        Some(raw.to_string())
    }

    pub fn reject(&mut self, message: impl Into<String>) {
        self.status = InputStatus::Invalid;
        self.errors.push(message.into());
    }

    /// Local checks passed; the CAS still has to rule.
    pub fn defer(&mut self) {
        self.status = InputStatus::Pending;
    }

    /// The value is valid. With `must_verify`, it also has to match the echo.
    pub fn accept(&mut self) {
        let confirmed = !self.decl.must_verify || self.echo.as_deref() == self.raw.as_deref();
        self.status = if confirmed {
            InputStatus::Valid
        } else {
            InputStatus::Unconfirmed
        };
    }

    pub fn expected_field_names(&self) -> Vec<String> {
        let mut fields = vec![self.decl.name.clone()];
        if self.decl.must_verify {
            fields.push(verification_field(&self.decl.name));
        }
        fields
    }

    pub fn message(&self) -> ValidationMessage {
        ValidationMessage {
            status: self.status,
            value: self.raw.clone(),
            display: self.display.clone(),
            errors: self.errors.clone(),
        }
    }

    pub fn has_teacher_answer(&self) -> bool {
        self.decl.teacher_answer.is_some()
    }

    pub fn teacher_statements(&self) -> Vec<CasStatement> {
        self.decl
            .teacher_answer
            .iter()
            .map(|ta| CasStatement::keyed(keys::teacher_answer(&self.decl.name), ta.clone()))
            .collect()
    }

    pub fn apply_teacher(&mut self, results: &CasResponse) {
        self.teacher_value = results.get(&keys::teacher_answer(&self.decl.name)).cloned();
    }

    /// Read the CAS verdict for a pending value: `true` or an error string.
    pub fn apply_verdict(&mut self, results: &CasResponse) {
        if self.status != InputStatus::Pending {
            return;
        }
        match results.get(&keys::input_validation(&self.decl.name)) {
            Some(CasValue::Bool(true)) => self.accept(),
            Some(CasValue::String(message)) => self.reject(message.clone()),
            Some(_) => self.reject("This answer is not a valid expression."),
            None => self.reject("No validation result was returned for this answer."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_rules_respect_allow_list() {
        let mut rules = SecurityRules::default();
        assert!(!rules.permits("system", &[]));
        assert!(rules.permits("sin", &[]));
        assert!(!rules.permits("sin", &["sin".to_string()]));
        rules.allowed_words.push("ev".into());
        assert!(rules.permits("ev", &[]));
    }

    #[test]
    fn capture_reads_value_and_echo() {
        let mut decl = InputDeclaration::new("ans1", InputKind::Algebraic);
        decl.must_verify = true;
        let mut core = InputCore::new(decl);
        let response = Response::new().with("ans1", " x+1 ").with("ans1_val", "x+1");
        assert_eq!(
            core.capture(&response, &SecurityRules::default()).as_deref(),
            Some("x+1")
        );
        core.accept();
        assert_eq!(core.status, InputStatus::Valid);
        assert_eq!(core.expected_field_names(), vec!["ans1", "ans1_val"]);
    }

    #[test]
    fn must_verify_without_echo_is_unconfirmed() {
        let mut decl = InputDeclaration::new("ans1", InputKind::Algebraic);
        decl.must_verify = true;
        let mut core = InputCore::new(decl);
        core.capture(&Response::new().with("ans1", "x"), &SecurityRules::default());
        core.accept();
        assert_eq!(core.status, InputStatus::Unconfirmed);
    }

    #[test]
    fn overlong_input_is_rejected_locally() {
        let rules = SecurityRules {
            max_input_length: 3,
            ..Default::default()
        };
        let mut core = InputCore::new(InputDeclaration::new("ans1", InputKind::String));
        assert!(core.capture(&Response::new().with("ans1", "abcd"), &rules).is_none());
        assert_eq!(core.status, InputStatus::Invalid);
    }

    #[test]
    fn response_collects_from_pairs() {
        let response: Response = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(response.get("b"), Some("2"));
        assert_eq!(response.fields().count(), 2);
    }
}
