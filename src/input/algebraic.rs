//! Algebraic expression input.
//!
//! Local checks cover everything that can be decided without the CAS:
//! normalisation, length, bracket balance, forbidden characters and words,
//! and missing multiplication signs. Whatever survives is handed to the CAS
//! for a final verdict and a rendered display.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::{
    Input, InputCore, InputKind, InputStatus, Response, SecurityRules, TeacherAnswer,
    ValidationDisplay, ValidationMessage,
};
use crate::cas::value::{check_balanced, quote};
use crate::cas::{CasResponse, CasStatement, CasValue};
use crate::compile::keys;
use crate::question::prt::identifiers;

static MISSING_STAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\b[0-9]+(?:\.[0-9]+)?[A-Za-z(]|\)[A-Za-z0-9(])").expect("static regex is valid")
});

const FORBIDDEN_CHARS: &[char] = &[';', '$', '\\', '?', '@', '`', ':', '"', '\''];

/// Bring typographic variants to plain ASCII operators.
pub fn normalize(raw: &str) -> String {
    raw.nfkc()
        .map(|c| match c {
            '\u{2212}' | '\u{2013}' => '-',
            '\u{00d7}' | '\u{00b7}' | '\u{22c5}' => '*',
            '\u{00f7}' => '/',
            other => other,
        })
        .collect()
}

/// `1e5`, `2.5E-3`: a digit run followed by an exponent marker and digits.
fn is_exponent(expr: &str, m: &regex::Match<'_>) -> bool {
    if !m.as_str().ends_with(['e', 'E']) || !m.as_str().starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    let rest = &expr[m.end()..];
    let rest = rest.strip_prefix(['+', '-']).unwrap_or(rest);
    rest.starts_with(|c: char| c.is_ascii_digit())
}

fn local_check(expr: &str, security: &SecurityRules, extra: &[String]) -> Result<(), String> {
    if let Some(c) = expr.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("The character `{c}` is not allowed in your answer."));
    }
    check_balanced(expr).map_err(|e| format!("Your answer has {e}."))?;
    if expr.ends_with(['+', '-', '*', '/', '^', '=', ',']) {
        return Err("Your answer ends with an operator.".into());
    }
    if let Some(m) = MISSING_STAR
        .find_iter(expr)
        .find(|m| !is_exponent(expr, m))
    {
        return Err(format!(
            "You seem to be missing a `*` in `{}`.",
            m.as_str()
        ));
    }
    let mut banned: Vec<String> = identifiers(expr)
        .into_iter()
        .filter(|word| !security.permits(word, extra))
        .collect();
    if !banned.is_empty() {
        banned.sort();
        return Err(format!("Forbidden words: {}.", banned.join(", ")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AlgebraicInput {
    core: InputCore,
}

impl AlgebraicInput {
    pub fn new(decl: super::InputDeclaration) -> Self {
        Self {
            core: InputCore::new(decl),
        }
    }

    /// The evaluated teacher answer once the scene has initialised it,
    /// otherwise the declared expression.
    fn verdict_statement(&self, expr: &str) -> CasStatement {
        let tans = match (self.teacher_value(), self.core.decl.teacher_answer.as_deref()) {
            (Some(value), _) => value.to_cas(),
            (None, Some(declared)) => declared.to_string(),
            (None, None) => "false".to_string(),
        };
        CasStatement::keyed(
            keys::input_validation(self.core.name()),
            format!(
                "stateful_validate({}, {}, {tans})",
                quote(expr),
                self.core.decl.lowest_terms
            ),
        )
    }
}

impl Input for AlgebraicInput {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> InputKind {
        InputKind::Algebraic
    }

    fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement> {
        let Some(raw) = self.core.capture(response, security) else {
            return Vec::new();
        };
        let expr = normalize(&raw);
        if let Err(message) = local_check(&expr, security, &self.core.decl.forbid_words) {
            self.core.reject(message);
            return Vec::new();
        }
        self.core.raw = Some(expr.clone());
        self.core.defer();
        vec![self.verdict_statement(&expr)]
    }

    fn apply_validation(&mut self, results: &CasResponse) {
        self.core.apply_verdict(results);
    }

    fn status(&self) -> InputStatus {
        self.core.status
    }

    fn value(&self) -> Option<CasStatement> {
        if !self.is_valid() {
            return None;
        }
        let raw = self.core.raw.as_deref()?;
        Some(CasStatement::keyed(self.core.name(), raw))
    }

    fn expected_field_names(&self) -> Vec<String> {
        self.core.expected_field_names()
    }

    fn validation_message(&self) -> ValidationMessage {
        self.core.message()
    }

    fn as_teacher_answer(&mut self) -> Option<&mut dyn TeacherAnswer> {
        if self.core.has_teacher_answer() {
            Some(self)
        } else {
            None
        }
    }

    fn as_validation_display(&mut self) -> Option<&mut dyn ValidationDisplay> {
        Some(self)
    }
}

impl TeacherAnswer for AlgebraicInput {
    fn initialisation_statements(&self) -> Vec<CasStatement> {
        self.core.teacher_statements()
    }

    fn apply_initialisation(&mut self, results: &CasResponse) {
        self.core.apply_teacher(results);
    }

    fn teacher_value(&self) -> Option<&CasValue> {
        self.core.teacher_value.as_ref()
    }
}

impl ValidationDisplay for AlgebraicInput {
    fn display_statements(&self) -> Vec<CasStatement> {
        match (self.core.status, self.core.raw.as_deref()) {
            (InputStatus::Valid | InputStatus::Unconfirmed, Some(raw)) => {
                vec![CasStatement::keyed(
                    keys::input_display(self.core.name()),
                    format!("stateful_display({})", quote(raw)),
                )]
            }
            _ => Vec::new(),
        }
    }

    fn apply_display(&mut self, results: &CasResponse) {
        if let Some(display) = results
            .get(&keys::input_display(self.core.name()))
            .and_then(CasValue::as_str)
        {
            self.core.display = Some(display.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::CasOutput;
    use crate::input::InputDeclaration;

    fn input() -> AlgebraicInput {
        let mut decl = InputDeclaration::new("ans1", InputKind::Algebraic);
        decl.teacher_answer = Some("x^2".into());
        AlgebraicInput::new(decl)
    }

    fn verdict(value: CasValue) -> CasResponse {
        CasResponse {
            results: vec![CasOutput::ok(Some("__val_ans1".into()), value)],
        }
    }

    #[test]
    fn normalizes_typographic_operators() {
        assert_eq!(normalize("2\u{00d7}x\u{2212}1"), "2*x-1");
        assert_eq!(normalize("\u{ff58}"), "x");
    }

    #[test]
    fn local_errors_never_reach_the_cas() {
        let rules = SecurityRules::default();
        for bad in ["x+(", "x+", "2x", "system(\"ls\")", "a:3", "x;y"] {
            let mut input = input();
            let statements = input.validate(&Response::new().with("ans1", bad), &rules);
            assert!(statements.is_empty(), "{bad} produced CAS work");
            assert_eq!(input.status(), InputStatus::Invalid, "{bad} was accepted");
        }
    }

    #[test]
    fn well_formed_input_defers_to_the_cas() {
        let mut input = input();
        let statements =
            input.validate(&Response::new().with("ans1", "x^2+1"), &SecurityRules::default());
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].to_cas(),
            r#"__val_ans1:stateful_validate("x^2+1", false, x^2)"#
        );
        assert_eq!(input.status(), InputStatus::Pending);
        assert!(input.value().is_none());

        input.apply_validation(&verdict(CasValue::Bool(true)));
        assert!(input.is_valid());
        assert_eq!(input.value().unwrap().to_cas(), "ans1:x^2+1");
    }

    #[test]
    fn cas_rejection_carries_its_message() {
        let mut input = input();
        input.validate(&Response::new().with("ans1", "x^^2"), &SecurityRules::default());
        input.apply_validation(&verdict(CasValue::string("Unexpected `^`.")));
        let message = input.validation_message();
        assert_eq!(message.status, InputStatus::Invalid);
        assert_eq!(message.errors, vec!["Unexpected `^`.".to_string()]);
    }

    #[test]
    fn display_is_only_requested_for_valid_values() {
        let mut input = input();
        input.validate(&Response::new().with("ans1", "x"), &SecurityRules::default());
        assert!(input.display_statements().is_empty());
        input.apply_validation(&verdict(CasValue::Bool(true)));
        assert_eq!(input.display_statements().len(), 1);
        input.apply_display(&CasResponse {
            results: vec![CasOutput::ok(
                Some("__disp_ans1".into()),
                CasValue::string("\\(x\\)"),
            )],
        });
        assert_eq!(input.validation_message().display.as_deref(), Some("\\(x\\)"));
    }

    #[test]
    fn scientific_notation_is_not_a_missing_star() {
        let rules = SecurityRules::default();
        for ok in ["1e5", "2.5E-3*x", "3e+2"] {
            let mut input = input();
            let statements = input.validate(&Response::new().with("ans1", ok), &rules);
            assert_eq!(statements.len(), 1, "{ok} was rejected locally");
        }
        for bad in ["2e", "2ex", "3E+x"] {
            let mut input = input();
            input.validate(&Response::new().with("ans1", bad), &rules);
            assert_eq!(input.status(), InputStatus::Invalid, "{bad} was accepted");
        }
    }

    #[test]
    fn verdict_uses_the_evaluated_teacher_answer() {
        let mut input = input();
        input.apply_initialisation(&CasResponse {
            results: vec![CasOutput::ok(
                Some("__tea_ans1".into()),
                CasValue::Expr("x^2+0".into()),
            )],
        });
        assert_eq!(input.teacher_value(), Some(&CasValue::Expr("x^2+0".into())));
        let statements =
            input.validate(&Response::new().with("ans1", "x"), &SecurityRules::default());
        assert_eq!(
            statements[0].to_cas(),
            r#"__val_ans1:stateful_validate("x", false, x^2+0)"#
        );
    }

    #[test]
    fn blank_input_is_blank() {
        let mut input = input();
        assert!(input
            .validate(&Response::new().with("ans1", "   "), &SecurityRules::default())
            .is_empty());
        assert!(input.is_blank());
    }
}
