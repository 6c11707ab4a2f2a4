//! Shared fixtures: a three-scene question and a scripted CAS.
//!
//! `FakeCas` evaluates just enough of a batch to drive the engine: literals are
//! parsed, `castext("...")` yields its string, reserved bindings are computed
//! from earlier bindings in the same batch, and anything else can be scripted
//! per key with `set`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use stateful::cas::{BatchPurpose, CasBatch, CasEvaluator, CasOutput, CasResponse, CasValue};
use stateful::compile::SessionCompiler;
use stateful::config::EngineConfig;
use stateful::engine::Engine;
use stateful::error::{CasError, CasResult};
use stateful::question::Question;

pub const QUESTION: &str = r#"
name = "expand-then-evaluate"
entry_scene = "entry"
default_mark = 2
question_variables = "p: (x+1)^2"

[[state_variable]]
id = 1
name = "tries"
initial_value = "0"

[[scene]]
name = "entry"
text = "Expand {@p@}."
variables = "ta: expand(p)"

[[scene.input]]
name = "ans1"
type = "algebraic"
teacher_answer = "ta"

[[scene.input]]
name = "ans2"
type = "algebraic"

[[scene.prt]]
name = "p1"

[[scene.prt.node]]
test = "AlgEquiv"
sans = "ans1"
tans = "ta"
true = { score = 1, next_scene = "second", feedback = "Correct." }
false = { penalty = 0.1, feedback = "Not quite." }

[[scene.prt]]
name = "p2"
score_mode = "noscore"

[[scene.prt.node]]
test = "AlgEquiv"
sans = "ans2"
tans = "0"
true = {}
false = {}

[[scene]]
name = "second"
text = "Evaluate at x = 1."

[[scene.input]]
name = "ans1"
type = "numerical"
must_verify = true

[[scene.prt]]
name = "p1"

[[scene.prt.node]]
test = "NumAbsolute"
sans = "ans1"
tans = "4"
true = { score = 1, next_scene = "done" }
false = { penalty = 0.25 }

[[scene]]
name = "done"
text = "Finished."
"#;

pub fn question() -> Arc<Question> {
    Arc::new(Question::from_toml_str(QUESTION).unwrap())
}

/// A scripted CAS evaluator that records every batch it sees.
#[derive(Debug, Default)]
pub struct FakeCas {
    overrides: Mutex<BTreeMap<String, CasValue>>,
    fail_on: Mutex<Option<BatchPurpose>>,
    batches: Mutex<Vec<CasBatch>>,
}

impl FakeCas {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the value bound to `key` in every later batch.
    pub fn set(&self, key: &str, value: CasValue) {
        self.overrides.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn unset(&self, key: &str) {
        self.overrides.lock().unwrap().remove(key);
    }

    /// Make every later batch with `purpose` fail.
    pub fn fail_on(&self, purpose: Option<BatchPurpose>) {
        *self.fail_on.lock().unwrap() = purpose;
    }

    pub fn batches(&self) -> Vec<CasBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn count(&self, purpose: BatchPurpose) -> usize {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.purpose == purpose)
            .count()
    }

    pub fn last(&self, purpose: BatchPurpose) -> Option<CasBatch> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|b| b.purpose == purpose)
            .cloned()
    }

    fn bind(&self, key: &str, expr: &str, env: &[(String, CasValue)]) -> CasValue {
        if let Some(value) = self.overrides.lock().unwrap().get(key) {
            return value.clone();
        }
        let lookup = |name: &str| {
            env.iter()
                .rev()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        match key {
            "RANDOM_SEED" => return literal(expr),
            "SCENE_NEXT" => {
                return env
                    .iter()
                    .filter(|(k, _)| k.starts_with("__prt_"))
                    .filter_map(|(_, v)| v.as_list().and_then(|l| l.get(4)).cloned())
                    .find(|v| !v.is_false())
                    .unwrap_or(CasValue::Bool(false));
            }
            "__scene_path_next" => {
                let path = lookup("SCENE_PATH").unwrap_or(CasValue::List(Vec::new()));
                let moving = lookup("SCENE_NEXT").is_some_and(|v| !v.is_false());
                return match (moving, path, lookup("SCENE_CURRENT")) {
                    (true, CasValue::List(mut items), Some(current)) => {
                        items.push(current);
                        CasValue::List(items)
                    }
                    (_, path, _) => path,
                };
            }
            _ => {}
        }
        if key.starts_with("__val_") {
            return CasValue::Bool(true);
        }
        if let Some(input) = key.strip_prefix("__disp_") {
            return CasValue::string(format!("\\({input}\\)"));
        }
        if let Some(prt) = key.strip_prefix("__prt_") {
            return CasValue::List(vec![
                CasValue::string_list([format!("{prt}-0-F")]),
                CasValue::string(""),
                CasValue::Number(0.0),
                CasValue::Number(0.0),
                CasValue::Bool(false),
            ]);
        }
        if let Some(name) = key.strip_prefix("__sv_") {
            return lookup(name).unwrap_or_else(|| CasValue::Expr(name.to_string()));
        }
        if let Some(text) = expr
            .strip_prefix("castext(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return literal(text);
        }
        literal(expr)
    }
}

fn literal(expr: &str) -> CasValue {
    CasValue::parse(expr).unwrap_or_else(|_| CasValue::Expr(expr.to_string()))
}

impl CasEvaluator for FakeCas {
    fn evaluate(&self, batch: &CasBatch) -> CasResult<CasResponse> {
        self.batches.lock().unwrap().push(batch.clone());
        if *self.fail_on.lock().unwrap() == Some(batch.purpose) {
            return Err(CasError::Evaluator {
                message: format!("scripted failure in {}", batch.purpose),
            });
        }

        let mut env: Vec<(String, CasValue)> = Vec::new();
        let mut results = Vec::with_capacity(batch.len());
        for statement in &batch.statements {
            match &statement.key {
                Some(key) => {
                    let value = self.bind(key, &statement.expr, &env);
                    env.push((key.clone(), value.clone()));
                    results.push(CasOutput::ok(Some(key.clone()), value));
                }
                None => results.push(CasOutput::ok(None, CasValue::Bool(true))),
            }
        }
        Ok(CasResponse { results })
    }
}

/// A PRT tuple `[path, feedback, score, penalty, next]`.
pub fn prt_tuple(note: &str, feedback: &str, score: f64, penalty: f64, next: Option<&str>) -> CasValue {
    CasValue::List(vec![
        CasValue::string_list([note]),
        CasValue::string(feedback),
        CasValue::Number(score),
        CasValue::Number(penalty),
        next.map_or(CasValue::Bool(false), CasValue::string),
    ])
}

/// An engine over [`QUESTION`] with a started attempt.
/// Whether any statement of `batch` is bound to `key`.
pub fn binds(batch: &CasBatch, key: &str) -> bool {
    batch.statements.iter().any(|s| s.key.as_deref() == Some(key))
}

pub fn started_engine(cas: &Arc<FakeCas>) -> Engine {
    let mut engine = engine(cas);
    engine.start_attempt(Some(42)).unwrap();
    engine
}

pub fn engine(cas: &Arc<FakeCas>) -> Engine {
    let question = question();
    let cache = Arc::new(SessionCompiler::compile(&question).unwrap());
    let cas: Arc<dyn CasEvaluator> = cas.clone();
    Engine::new(question, cache, cas, EngineConfig::default())
}
