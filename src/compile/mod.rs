//! Session compiler: question declarations to CAS statement templates.
//!
//! Compilation happens once per question. The resulting [`SessionCache`] is
//! immutable and shared read-only by every attempt; the execution core reads it
//! through the [`CompiledStore`] trait, addressed by the stable string keys in
//! [`keys`].

pub mod keys;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cas::value::quote;
use crate::cas::{CasStatement, CasValue};
use crate::error::{CompileError, CompileResult};
use crate::question::prt::{Prt, PrtBranch, ScoreOp};
use crate::question::{Question, Scene};

pub use registry::CacheRegistry;

/// One compiled cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CompiledEntry {
    /// Statements to splice into a batch, in order.
    Statements { statements: Vec<CasStatement> },
    /// Names of the inputs a PRT requires.
    Inputs { inputs: BTreeSet<String> },
}

/// Read access to compiled templates.
pub trait CompiledStore: Send + Sync {
    fn get_compiled(&self, key: &str) -> Option<&CompiledEntry>;

    /// The statements stored under `key`.
    fn statements(&self, key: &str) -> CompileResult<&[CasStatement]> {
        match self.get_compiled(key) {
            Some(CompiledEntry::Statements { statements }) => Ok(statements),
            Some(_) => Err(CompileError::WrongKind {
                key: key.to_string(),
                expected: "statements",
            }),
            None => Err(CompileError::Missing {
                key: key.to_string(),
            }),
        }
    }

    /// The required-input set stored under `key`.
    fn inputs(&self, key: &str) -> CompileResult<&BTreeSet<String>> {
        match self.get_compiled(key) {
            Some(CompiledEntry::Inputs { inputs }) => Ok(inputs),
            Some(_) => Err(CompileError::WrongKind {
                key: key.to_string(),
                expected: "inputs",
            }),
            None => Err(CompileError::Missing {
                key: key.to_string(),
            }),
        }
    }
}

/// All compiled templates of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCache {
    pub question: String,
    pub entries: BTreeMap<String, CompiledEntry>,
}

impl SessionCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl CompiledStore for SessionCache {
    fn get_compiled(&self, key: &str) -> Option<&CompiledEntry> {
        self.entries.get(key)
    }
}

/// Compiles a validated [`Question`] into a [`SessionCache`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionCompiler;

impl SessionCompiler {
    pub fn compile(question: &Question) -> CompileResult<SessionCache> {
        question.validate()?;

        let mut entries = BTreeMap::new();
        let mut put = |key: String, statements: Vec<CasStatement>| {
            entries.insert(key, CompiledEntry::Statements { statements });
        };

        put(
            keys::QUESTION_VARIABLES_KEY.to_string(),
            function_with_call(keys::question_variables_fn(), &question.question_variables),
        );
        put(
            keys::MODEL_SOLUTION_KEY.to_string(),
            castext(keys::QUESTION_MODEL_SOLUTION, &question.model_solution),
        );
        put(
            keys::STATE_VARIABLES_KEY.to_string(),
            question
                .state_variables
                .iter()
                .map(|sv| CasStatement::keyed(&sv.name, &sv.initial_value))
                .collect(),
        );

        for scene in &question.scenes {
            Self::compile_scene(scene, &mut entries);
        }

        tracing::debug!(
            question = %question.name,
            scenes = question.scenes.len(),
            entries = entries.len(),
            "compiled session cache"
        );

        Ok(SessionCache {
            question: question.name.clone(),
            entries,
        })
    }

    fn compile_scene(scene: &Scene, entries: &mut BTreeMap<String, CompiledEntry>) {
        let name = &scene.name;
        entries.insert(
            keys::scene_variables_key(name),
            CompiledEntry::Statements {
                statements: function_with_call(&keys::scene_variables_fn(name), &scene.variables),
            },
        );
        entries.insert(
            keys::scene_text_key(name),
            CompiledEntry::Statements {
                statements: castext(keys::SCENE_TEXT, &scene.text),
            },
        );
        entries.insert(
            keys::scene_model_solution_key(name),
            CompiledEntry::Statements {
                statements: castext(keys::SCENE_MODEL_SOLUTION, &scene.model_solution),
            },
        );

        for prt in &scene.prts {
            entries.insert(
                keys::prt_key(name, &prt.name),
                CompiledEntry::Statements {
                    statements: vec![CasStatement::bare(compile_prt(name, prt))],
                },
            );
            entries.insert(
                keys::prt_inputs_key(name, &prt.name),
                CompiledEntry::Inputs {
                    inputs: prt.required_inputs(scene.input_names()),
                },
            );
        }
    }
}

/// Split authored variable text into individual statements.
fn split_statements(source: &str) -> Vec<&str> {
    source
        .split([';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Define `name()` as the statements of `source` and call it once.
fn function_with_call(name: &str, source: &str) -> Vec<CasStatement> {
    let body = split_statements(source);
    if body.is_empty() {
        return Vec::new();
    }
    vec![
        CasStatement::bare(format!("{name}():=({})", body.join(","))),
        CasStatement::bare(format!("{name}()")),
    ]
}

fn castext(key: &str, text: &str) -> Vec<CasStatement> {
    vec![CasStatement::keyed(key, format!("castext({})", quote(text)))]
}

fn number(x: f64) -> String {
    CasValue::Number(x).to_cas()
}

/// Compile a PRT into a CAS function returning
/// `[path, feedback, score, penalty, next_scene]`.
pub fn compile_prt(scene: &str, prt: &Prt) -> String {
    let mut body = vec![
        "PRT_PATH:[]".to_string(),
        "PRT_FEEDBACK:\"\"".to_string(),
        "PRT_SCORE:0".to_string(),
        "PRT_PENALTY:0".to_string(),
        "PRT_NEXT:false".to_string(),
    ];
    body.extend(
        split_statements(&prt.feedback_variables)
            .into_iter()
            .map(str::to_string),
    );
    body.push(compile_node(prt, prt.first_node));
    body.push("[PRT_PATH,PRT_FEEDBACK,max(0,min(1,PRT_SCORE)),PRT_PENALTY,PRT_NEXT]".into());
    format!(
        "{}():=block([PRT_PATH,PRT_FEEDBACK,PRT_SCORE,PRT_PENALTY,PRT_NEXT,PRT_AT],{})",
        keys::prt_fn(scene, &prt.name),
        body.join(",")
    )
}

/// Nodes are inlined depth-first; the tree is acyclic after validation.
fn compile_node(prt: &Prt, index: usize) -> String {
    let node = &prt.nodes[index];
    let test = &node.test;
    let args = match &test.options {
        Some(options) => format!("{},{},{options}", test.sans, test.tans),
        None => format!("{},{}", test.sans, test.tans),
    };
    let mut at = vec![format!("PRT_AT:AT{}({args})", test.test)];
    if !test.quiet {
        at.push("PRT_FEEDBACK:sconcat(PRT_FEEDBACK,PRT_AT[4])".into());
    }
    format!(
        "({},if PRT_AT[2] then ({}) else ({}))",
        at.join(","),
        compile_branch(prt, index, &node.true_branch, "T"),
        compile_branch(prt, index, &node.false_branch, "F"),
    )
}

fn compile_branch(prt: &Prt, index: usize, branch: &PrtBranch, side: &str) -> String {
    let note = if branch.answer_note.is_empty() {
        format!("{}-{index}-{side}", prt.name)
    } else {
        branch.answer_note.clone()
    };
    let mut parts = vec![format!("PRT_PATH:endcons({},PRT_PATH)", quote(&note))];
    let score = number(branch.score);
    parts.push(match branch.score_op {
        ScoreOp::Add => format!("PRT_SCORE:PRT_SCORE+{score}"),
        ScoreOp::Subtract => format!("PRT_SCORE:PRT_SCORE-{score}"),
        ScoreOp::Set => format!("PRT_SCORE:{score}"),
    });
    if branch.penalty != 0.0 {
        parts.push(format!("PRT_PENALTY:PRT_PENALTY+{}", number(branch.penalty)));
    }
    if !branch.feedback.is_empty() {
        parts.push(format!(
            "PRT_FEEDBACK:sconcat(PRT_FEEDBACK,castext({}))",
            quote(&branch.feedback)
        ));
    }
    if let Some(next_scene) = &branch.next_scene {
        parts.push(format!("PRT_NEXT:{}", quote(next_scene)));
    }
    if let Some(next) = branch.next {
        parts.push(compile_node(prt, next));
    }
    parts.join(",")
}
