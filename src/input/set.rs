//! The inputs of one active scene.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_input, Input, InputDeclaration, Response, SecurityRules, ValidationMessage};
use crate::cas::{CasResponse, CasStatement};

/// Inputs of the active scene, in declaration order.
#[derive(Debug, Default)]
pub struct InputSet {
    inputs: Vec<Box<dyn Input>>,
}

impl InputSet {
    pub fn from_declarations(declarations: &[InputDeclaration]) -> Self {
        Self {
            inputs: declarations.iter().map(build_input).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Input> {
        self.inputs
            .iter()
            .find(|i| i.name() == name)
            .map(|i| i.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Input + 'static)> {
        self.inputs
            .iter_mut()
            .find(|i| i.name() == name)
            .map(|i| i.as_mut())
    }

    /// Statements evaluating teacher answers at scene start.
    pub fn initialisation_statements(&mut self) -> Vec<CasStatement> {
        self.inputs
            .iter_mut()
            .filter_map(|i| i.as_teacher_answer())
            .flat_map(|t| t.initialisation_statements())
            .collect()
    }

    pub fn apply_initialisation(&mut self, results: &CasResponse) {
        for teacher in self.inputs.iter_mut().filter_map(|i| i.as_teacher_answer()) {
            teacher.apply_initialisation(results);
        }
    }

    /// Run every input's local validation and collect the CAS statements still
    /// needed for a verdict.
    pub fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement> {
        self.inputs
            .iter_mut()
            .flat_map(|i| i.validate(response, security))
            .collect()
    }

    pub fn apply_validation(&mut self, results: &CasResponse) {
        for input in &mut self.inputs {
            input.apply_validation(results);
        }
    }

    /// Statements rendering validation displays for inputs that support it.
    pub fn display_statements(&mut self) -> Vec<CasStatement> {
        self.inputs
            .iter_mut()
            .filter_map(|i| i.as_validation_display())
            .flat_map(|d| d.display_statements())
            .collect()
    }

    pub fn apply_display(&mut self, results: &CasResponse) {
        for display in self.inputs.iter_mut().filter_map(|i| i.as_validation_display()) {
            display.apply_display(results);
        }
    }

    /// True iff every non-blank input is valid (and confirmed, where required).
    pub fn all_valid(&self) -> bool {
        self.inputs.iter().all(|i| i.is_blank() || i.is_valid())
    }

    /// True iff every input named in `required` exists and is valid.
    pub fn has_valid_for(&self, required: &BTreeSet<String>) -> bool {
        required
            .iter()
            .all(|name| self.get(name).is_some_and(|i| i.is_valid()))
    }

    /// Value bindings of every valid input.
    pub fn cas_values(&self) -> Vec<CasStatement> {
        self.inputs.iter().filter_map(|i| i.value()).collect()
    }

    pub fn validation_messages(&self) -> BTreeMap<String, ValidationMessage> {
        self.inputs
            .iter()
            .map(|i| (i.name().to_string(), i.validation_message()))
            .collect()
    }

    pub fn expected_field_names(&self) -> Vec<String> {
        self.inputs
            .iter()
            .flat_map(|i| i.expected_field_names())
            .collect()
    }

    /// One-line description of input states, e.g. `ans1: valid; ans2: blank`.
    pub fn summary(&self) -> String {
        self.inputs
            .iter()
            .map(|i| format!("{}: {}", i.name(), i.status()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::{CasOutput, CasValue};
    use crate::input::InputKind;

    fn set() -> InputSet {
        let mut alg = InputDeclaration::new("ans1", InputKind::Algebraic);
        alg.teacher_answer = Some("x^2".into());
        InputSet::from_declarations(&[alg, InputDeclaration::new("ans2", InputKind::Numerical)])
    }

    fn required(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn teacher_answers_are_initialised() {
        let mut inputs = set();
        let statements = inputs.initialisation_statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].to_cas(), "__tea_ans1:x^2");
    }

    #[test]
    fn applicability_requires_every_named_input_valid() {
        let mut inputs = set();
        let pending = inputs.validate(
            &Response::new().with("ans1", "x").with("ans2", "3"),
            &SecurityRules::default(),
        );
        assert_eq!(pending.len(), 1);
        assert!(inputs.has_valid_for(&required(&["ans2"])));
        assert!(!inputs.has_valid_for(&required(&["ans1", "ans2"])));
        assert!(!inputs.all_valid());

        inputs.apply_validation(&CasResponse {
            results: vec![CasOutput::ok(Some("__val_ans1".into()), CasValue::Bool(true))],
        });
        assert!(inputs.has_valid_for(&required(&["ans1", "ans2"])));
        assert!(!inputs.has_valid_for(&required(&["ans3"])));
        assert!(inputs.all_valid());
        assert_eq!(inputs.cas_values().len(), 2);
        assert_eq!(inputs.summary(), "ans1: valid; ans2: valid");
    }

    #[test]
    fn blank_inputs_do_not_invalidate_the_set() {
        let mut inputs = set();
        inputs.validate(&Response::new().with("ans2", "1"), &SecurityRules::default());
        assert!(inputs.all_valid());
        assert!(inputs.get("ans1").is_some_and(|i| i.is_blank()));
        assert!(!inputs.has_valid_for(&required(&["ans1"])));
    }
}
