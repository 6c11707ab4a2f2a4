//! Assembly of the CAS batches the engine sends.
//!
//! Every batch opens with the same preamble: random seed, optional language,
//! question variables, the stored value of every state variable, then
//! `SCENE_CURRENT` and `SCENE_PATH`. What follows depends on the purpose.

use super::Engine;
use crate::cas::value::quote;
use crate::cas::{BatchPurpose, CasBatch, CasOptions, CasResponse, CasStatement};
use crate::compile::keys;
use crate::error::{CasResult, CompileResult};
use crate::question::Scene;
use crate::state::StateKey;

impl Engine {
    pub(super) fn cas_options(&self) -> CasOptions {
        CasOptions {
            language: self.config.language.clone(),
            simp: true,
        }
    }

    /// Seed and language bindings.
    pub(super) fn seed_statements(&self, seed: u64) -> Vec<CasStatement> {
        let mut statements = vec![CasStatement::keyed(keys::RANDOM_SEED, seed.to_string())];
        if let Some(language) = &self.config.language {
            statements.push(CasStatement::keyed(keys::LANGUAGE, quote(language)));
        }
        statements
    }

    /// Current value of every state variable, falling back to its initial
    /// value expression when nothing is stored yet.
    pub(super) fn state_bindings(&self) -> Vec<CasStatement> {
        self.question
            .state_variables
            .iter()
            .map(|sv| {
                let value = self
                    .store
                    .get(StateKey::from(sv.id))
                    .unwrap_or_else(|| sv.initial_value.clone());
                CasStatement::keyed(&sv.name, value)
            })
            .collect()
    }

    pub(super) fn scene_bindings(&self) -> Vec<CasStatement> {
        vec![
            CasStatement::keyed(
                keys::SCENE_CURRENT,
                self.store.get_or(StateKey::SCENE_CURRENT, "false"),
            ),
            CasStatement::keyed(
                keys::SCENE_PATH,
                self.store.get_or(StateKey::SCENE_PATH, "[]"),
            ),
        ]
    }

    pub(super) fn preamble(&self, purpose: BatchPurpose) -> CompileResult<CasBatch> {
        let mut batch = CasBatch::new(purpose, self.seed, self.cas_options());
        batch.extend(self.seed_statements(self.seed));
        batch.extend(self.cache.statements(keys::QUESTION_VARIABLES_KEY)?.iter().cloned());
        batch.extend(self.state_bindings());
        batch.extend(self.scene_bindings());
        Ok(batch)
    }

    /// Seed, question variables and the initial value of every state variable.
    pub(super) fn state_initialization_batch(&self, seed: u64) -> CompileResult<CasBatch> {
        let mut batch = CasBatch::new(BatchPurpose::StateInitialization, seed, self.cas_options());
        batch.extend(self.seed_statements(seed));
        batch.extend(self.cache.statements(keys::QUESTION_VARIABLES_KEY)?.iter().cloned());
        batch.extend(self.cache.statements(keys::STATE_VARIABLES_KEY)?.iter().cloned());
        Ok(batch)
    }

    pub(super) fn scene_initialization_batch(
        &self,
        scene: &Scene,
        input_initialisation: Vec<CasStatement>,
    ) -> CompileResult<CasBatch> {
        let mut batch = self.preamble(BatchPurpose::SceneInitialization)?;
        for key in [
            keys::scene_variables_key(&scene.name),
            keys::scene_text_key(&scene.name),
            keys::scene_model_solution_key(&scene.name),
            keys::MODEL_SOLUTION_KEY.to_string(),
        ] {
            batch.extend(self.cache.statements(&key)?.iter().cloned());
        }
        batch.extend(input_initialisation);
        Ok(batch)
    }

    /// Validation and display rendering both run with simplification off.
    pub(super) fn validation_batch(
        &self,
        scene: &str,
        statements: Vec<CasStatement>,
    ) -> CompileResult<CasBatch> {
        let mut batch = self.preamble(BatchPurpose::Validation)?;
        batch.extend(
            self.cache
                .statements(&keys::scene_variables_key(scene))?
                .iter()
                .cloned(),
        );
        batch.push(CasStatement::simp(false));
        batch.extend(statements);
        Ok(batch)
    }

    pub(super) fn prt_batch(
        &self,
        scene: &str,
        applicable: &[String],
        input_values: Vec<CasStatement>,
        display: Vec<CasStatement>,
    ) -> CompileResult<CasBatch> {
        let mut batch = self.preamble(BatchPurpose::PrtEvaluation)?;
        batch.extend(
            self.cache
                .statements(&keys::scene_variables_key(scene))?
                .iter()
                .cloned(),
        );
        batch.extend(input_values);
        batch.extend(display);

        for prt in applicable {
            batch.extend(self.cache.statements(&keys::prt_key(scene, prt))?.iter().cloned());
            batch.push(CasStatement::simp(false));
            batch.push(CasStatement::keyed(
                keys::prt_result(prt),
                format!("{}()", keys::prt_fn(scene, prt)),
            ));
        }
        batch.push(CasStatement::simp(true));

        batch.push(scene_next(applicable));
        batch.push(CasStatement::keyed(
            keys::SCENE_PATH_NEXT,
            format!(
                "if {next}=false then {path} else endcons({current},{path})",
                next = keys::SCENE_NEXT,
                path = keys::SCENE_PATH,
                current = keys::SCENE_CURRENT,
            ),
        ));
        batch.extend(
            self.question
                .state_variables
                .iter()
                .map(|sv| CasStatement::keyed(keys::state_passthrough(&sv.name), &sv.name)),
        );
        Ok(batch)
    }

    pub(super) fn run(&self, batch: &CasBatch) -> CasResult<CasResponse> {
        tracing::debug!(
            purpose = %batch.purpose,
            statements = batch.len(),
            seed = batch.seed,
            "evaluating CAS batch"
        );
        self.cas.evaluate(batch)?.checked(batch)
    }
}

/// `SCENE_NEXT`: the first non-`false` proposal among the PRT results, in
/// declaration order, or `false`.
fn scene_next(applicable: &[String]) -> CasStatement {
    let proposals: Vec<String> = applicable
        .iter()
        .map(|prt| {
            let result = keys::prt_result(prt);
            format!("if length({result})>=5 then {result}[5] else false")
        })
        .collect();
    CasStatement::keyed(
        keys::SCENE_NEXT,
        format!(
            "first(append(sublist([{}],lambda([n],n#false)),[false]))",
            proposals.join(",")
        ),
    )
}
