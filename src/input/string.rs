//! Free-text input, passed to the CAS as a quoted string.

use super::{
    Input, InputCore, InputDeclaration, InputKind, InputStatus, Response, SecurityRules,
    ValidationMessage,
};
use crate::cas::{CasResponse, CasStatement, CasValue};

#[derive(Debug, Clone)]
pub struct StringInput {
    core: InputCore,
}

impl StringInput {
    pub fn new(decl: InputDeclaration) -> Self {
        Self {
            core: InputCore::new(decl),
        }
    }
}

impl Input for StringInput {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> InputKind {
        InputKind::String
    }

    fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement> {
        if self.core.capture(response, security).is_some() {
            self.core.accept();
        }
        Vec::new()
    }

    fn apply_validation(&mut self, _results: &CasResponse) {}

    fn status(&self) -> InputStatus {
        self.core.status
    }

    fn value(&self) -> Option<CasStatement> {
        if !self.is_valid() {
            return None;
        }
        let raw = self.core.raw.as_deref()?;
        Some(CasStatement::keyed(
            self.core.name(),
            CasValue::string(raw).to_cas(),
        ))
    }

    fn expected_field_names(&self) -> Vec<String> {
        self.core.expected_field_names()
    }

    fn validation_message(&self) -> ValidationMessage {
        self.core.message()
    }
}
