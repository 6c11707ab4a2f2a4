//! Numerical input. Decided entirely locally.

use super::{
    Input, InputCore, InputDeclaration, InputKind, InputStatus, Response, SecurityRules,
    ValidationMessage,
};
use crate::cas::{CasResponse, CasStatement, CasValue};

#[derive(Debug, Clone)]
pub struct NumericalInput {
    core: InputCore,
    number: Option<f64>,
}

impl NumericalInput {
    pub fn new(decl: InputDeclaration) -> Self {
        Self {
            core: InputCore::new(decl),
            number: None,
        }
    }

    fn check(&self, raw: &str) -> Result<f64, String> {
        let n: f64 = raw
            .replace(['\u{2212}'], "-")
            .parse()
            .map_err(|_| format!("`{raw}` is not a number."))?;
        if !n.is_finite() {
            return Err(format!("`{raw}` is not a finite number."));
        }
        if let Some(min) = self.core.decl.min {
            if n < min {
                return Err(format!("Your answer must be at least {min}."));
            }
        }
        if let Some(max) = self.core.decl.max {
            if n > max {
                return Err(format!("Your answer must be at most {max}."));
            }
        }
        Ok(n)
    }
}

impl Input for NumericalInput {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> InputKind {
        InputKind::Numerical
    }

    fn validate(&mut self, response: &Response, security: &SecurityRules) -> Vec<CasStatement> {
        self.number = None;
        let Some(raw) = self.core.capture(response, security) else {
            return Vec::new();
        };
        match self.check(&raw) {
            Ok(n) => {
                self.number = Some(n);
                self.core.accept();
            }
            Err(message) => self.core.reject(message),
        }
        Vec::new()
    }

    fn apply_validation(&mut self, _results: &CasResponse) {}

    fn status(&self) -> InputStatus {
        self.core.status
    }

    fn value(&self) -> Option<CasStatement> {
        let n = self.number.filter(|_| self.is_valid())?;
        Some(CasStatement::keyed(
            self.core.name(),
            CasValue::Number(n).to_cas(),
        ))
    }

    fn expected_field_names(&self) -> Vec<String> {
        self.core.expected_field_names()
    }

    fn validation_message(&self) -> ValidationMessage {
        let mut message = self.core.message();
        if self.is_valid() {
            message.display = self.number.map(|n| n.to_string());
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded() -> NumericalInput {
        let mut decl = InputDeclaration::new("n", InputKind::Numerical);
        decl.min = Some(0.0);
        decl.max = Some(10.0);
        NumericalInput::new(decl)
    }

    #[test]
    fn parses_locally_without_cas_work() {
        let mut input = bounded();
        let statements = input.validate(&Response::new().with("n", "2.5"), &SecurityRules::default());
        assert!(statements.is_empty());
        assert!(input.is_valid());
        assert_eq!(input.value().unwrap().to_cas(), "n:2.5");
    }

    #[test]
    fn enforces_bounds_and_syntax() {
        for bad in ["11", "-1", "ten", "inf", "NaN"] {
            let mut input = bounded();
            input.validate(&Response::new().with("n", bad), &SecurityRules::default());
            assert_eq!(input.status(), InputStatus::Invalid, "{bad} was accepted");
            assert!(input.value().is_none());
        }
    }

    #[test]
    fn typographic_minus_is_accepted() {
        let mut input = NumericalInput::new(InputDeclaration::new("n", InputKind::Numerical));
        input.validate(&Response::new().with("n", "\u{2212}3"), &SecurityRules::default());
        assert_eq!(input.value().unwrap().to_cas(), "n:-3");
    }
}
