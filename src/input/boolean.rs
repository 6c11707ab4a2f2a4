//! True/false input.

use super::{
    Input, InputCore, InputDeclaration, InputKind, InputStatus, Response, SecurityRules,
    ValidationMessage,
};
use crate::cas::{CasResponse, CasStatement, CasValue};

#[derive(Debug, Clone)]
pub struct BooleanInput {
    core: InputCore,
    choice: Option<bool>,
}

impl BooleanInput {
    pub fn new(decl: InputDeclaration) -> Self {
        Self {
            core: InputCore::new(decl),
            choice: None,
        }
    }
}

impl Input for BooleanInput {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> InputKind {
        InputKind::Boolean
    }

    fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement> {
        self.choice = None;
        let Some(raw) = self.core.capture(response, security) else {
            return Vec::new();
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" => self.choice = Some(true),
            "false" => self.choice = Some(false),
            _ => {
                self.core.reject("Please choose true or false.");
                return Vec::new();
            }
        }
        self.core.accept();
        Vec::new()
    }

    fn apply_validation(&mut self, _results: &CasResponse) {}

    fn status(&self) -> InputStatus {
        self.core.status
    }

    fn value(&self) -> Option<CasStatement> {
        let choice = self.choice.filter(|_| self.is_valid())?;
        Some(CasStatement::keyed(
            self.core.name(),
            CasValue::Bool(choice).to_cas(),
        ))
    }

    fn expected_field_names(&self) -> Vec<String> {
        self.core.expected_field_names()
    }

    fn validation_message(&self) -> ValidationMessage {
        self.core.message()
    }
}
