//! Scene graph: the static, read-only definition of a stateful question.
//!
//! Scenes, their inputs and their PRTs live in flat vectors addressed by
//! [`SceneId`]. Nothing holds a pointer back to its owner; attempt state refers
//! to scenes by name only.
//!
//! Questions are authored as TOML:
//!
//! ```toml
//! name = "quadratics"
//! entry_scene = "entry"
//! default_mark = 1
//!
//! [[state_variable]]
//! id = 1
//! name = "tries"
//! initial_value = "0"
//!
//! [[scene]]
//! name = "entry"
//! text = "Expand {@(x+1)^2@}."
//!
//! [[scene.input]]
//! name = "ans1"
//! type = "algebraic"
//! teacher_answer = "x^2+2*x+1"
//!
//! [[scene.prt]]
//! name = "p1"
//!
//! [[scene.prt.node]]
//! test = "AlgEquiv"
//! sans = "ans1"
//! tans = "x^2+2*x+1"
//! true = { score = 1, next_scene = "done" }
//! false = { penalty = 0.1 }
//!
//! [[scene]]
//! name = "done"
//! ```

pub mod prt;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compile::keys::RESERVED_NAMES;
use crate::error::{QuestionError, QuestionResult};
use crate::input::{InputDeclaration, InputKind};

pub use prt::{AnswerTest, Prt, PrtBranch, PrtNode, ScoreMode, ScoreOp};

/// Names the engine binds in the CAS verbatim (`name:expr`).
static CAS_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("static regex is valid"));

/// Largest state variable identifier; storage keys are signed.
pub const MAX_STATE_VARIABLE_ID: u32 = i32::MAX as u32;

fn check_identifier(what: &'static str, name: &str) -> QuestionResult<()> {
    if CAS_IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(QuestionError::InvalidIdentifier {
            what,
            name: name.to_string(),
        })
    }
}

/// Stable index of a scene within its question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(pub usize);

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scene:{}", self.0)
    }
}

/// A value that survives scene transitions within one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVariable {
    /// Storage key. Assigned once at authoring time and never reused.
    pub id: u32,
    /// CAS binding name. Cosmetic as far as storage is concerned.
    pub name: String,
    /// CAS expression evaluated once when an attempt starts.
    pub initial_value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A named step of the question with its own inputs and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    /// CAS text template shown to the student.
    #[serde(default)]
    pub text: String,
    /// CAS statements evaluated whenever the scene is active.
    #[serde(default)]
    pub variables: String,
    #[serde(default)]
    pub model_solution: String,
    #[serde(default, rename = "input")]
    pub inputs: Vec<InputDeclaration>,
    #[serde(default, rename = "prt")]
    pub prts: Vec<Prt>,
}

impl Scene {
    /// An end scene has no inputs, so nothing can be submitted from it.
    pub fn is_end_scene(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input(&self, name: &str) -> Option<&InputDeclaration> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn prt(&self, name: &str) -> Option<&Prt> {
        self.prts.iter().find(|p| p.name == name)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.name.as_str())
    }
}

/// A complete stateful question definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub name: String,
    pub entry_scene: String,
    /// The maximum achievable mark; grades are normalized by it.
    #[serde(default = "default_mark")]
    pub default_mark: f64,
    /// CAS statements evaluated at the start of every batch.
    #[serde(default)]
    pub question_variables: String,
    #[serde(default)]
    pub model_solution: String,
    #[serde(default, rename = "state_variable")]
    pub state_variables: Vec<StateVariable>,
    #[serde(rename = "scene")]
    pub scenes: Vec<Scene>,
}

fn default_mark() -> f64 {
    1.0
}

impl Question {
    /// Parse and validate a TOML question definition.
    pub fn from_toml_str(source: &str) -> QuestionResult<Self> {
        let question: Self = toml::from_str(source).map_err(|e| QuestionError::Parse {
            message: e.to_string(),
        })?;
        question.validate()?;
        Ok(question)
    }

    /// Parse and validate a JSON question definition.
    pub fn from_json_str(source: &str) -> QuestionResult<Self> {
        let question: Self = serde_json::from_str(source).map_err(|e| QuestionError::Parse {
            message: e.to_string(),
        })?;
        question.validate()?;
        Ok(question)
    }

    /// Load a question from disk. `.json` files are read as JSON, everything
    /// else as TOML.
    pub fn load(path: &Path) -> QuestionResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| QuestionError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&source)
        } else {
            Self::from_toml_str(&source)
        }
    }

    pub fn scene_id(&self, name: &str) -> Option<SceneId> {
        self.scenes.iter().position(|s| s.name == name).map(SceneId)
    }

    /// Look up a scene by id. Ids come from [`Question::scene_id`], so an
    /// out-of-range id is a caller bug.
    pub fn scene(&self, id: SceneId) -> &Scene {
        &self.scenes[id.0]
    }

    pub fn scene_by_name(&self, name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.name == name)
    }

    pub fn entry(&self) -> Option<&Scene> {
        self.scene_by_name(&self.entry_scene)
    }

    pub fn state_variable(&self, id: u32) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.id == id)
    }

    /// Identifier → name for every state variable.
    pub fn state_variable_identifiers(&self) -> BTreeMap<u32, String> {
        self.state_variables
            .iter()
            .map(|v| (v.id, v.name.clone()))
            .collect()
    }

    /// Sum of the values of every scored PRT, across all scenes.
    pub fn total_prt_value(&self) -> f64 {
        self.scenes
            .iter()
            .flat_map(|s| &s.prts)
            .filter(|p| p.score_mode.is_scored())
            .map(|p| p.value)
            .sum()
    }

    /// Authoring-time checks. Returns the first problem found.
    pub fn validate(&self) -> QuestionResult<()> {
        if self.scenes.is_empty() {
            return Err(QuestionError::NoScenes {
                question: self.name.clone(),
            });
        }
        if !self.default_mark.is_finite() || self.default_mark < 0.0 {
            return Err(QuestionError::InvalidDefaultMark {
                value: self.default_mark,
            });
        }

        let mut scene_names = HashSet::new();
        for scene in &self.scenes {
            if !scene_names.insert(scene.name.as_str()) {
                return Err(QuestionError::DuplicateScene {
                    name: scene.name.clone(),
                });
            }
        }
        if !scene_names.contains(self.entry_scene.as_str()) {
            return Err(QuestionError::MissingEntryScene {
                name: self.entry_scene.clone(),
            });
        }

        self.validate_state_variables()?;

        for scene in &self.scenes {
            self.validate_scene(scene, &scene_names)?;
        }
        Ok(())
    }

    fn validate_state_variables(&self) -> QuestionResult<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for var in &self.state_variables {
            if RESERVED_NAMES.contains(&var.name.as_str()) {
                return Err(QuestionError::ReservedName {
                    name: var.name.clone(),
                });
            }
            check_identifier("state variable", &var.name)?;
            if var.id > MAX_STATE_VARIABLE_ID {
                return Err(QuestionError::StateVariableIdOutOfRange { id: var.id });
            }
            if !ids.insert(var.id) {
                return Err(QuestionError::DuplicateStateVariable {
                    what: "identifier",
                    value: var.id.to_string(),
                });
            }
            if !names.insert(var.name.as_str()) {
                return Err(QuestionError::DuplicateStateVariable {
                    what: "name",
                    value: var.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_scene(&self, scene: &Scene, scene_names: &HashSet<&str>) -> QuestionResult<()> {
        let duplicate = |what, name: &str| QuestionError::DuplicateMember {
            scene: scene.name.clone(),
            what,
            name: name.to_string(),
        };

        let mut inputs = HashSet::new();
        for input in &scene.inputs {
            if RESERVED_NAMES.contains(&input.name.as_str()) {
                return Err(QuestionError::ReservedName {
                    name: input.name.clone(),
                });
            }
            check_identifier("input", &input.name)?;
            if input.teacher_answer.is_some() && input.kind != InputKind::Algebraic {
                return Err(QuestionError::UnsupportedTeacherAnswer {
                    scene: scene.name.clone(),
                    input: input.name.clone(),
                    kind: input.kind.to_string(),
                });
            }
            if !inputs.insert(input.name.as_str()) {
                return Err(duplicate("input", &input.name));
            }
        }

        let mut prts = HashSet::new();
        for prt in &scene.prts {
            if !prts.insert(prt.name.as_str()) {
                return Err(duplicate("PRT", &prt.name));
            }
            check_identifier("PRT", &prt.name)?;
            if !prt.value.is_finite() || prt.value < 0.0 {
                return Err(QuestionError::InvalidValue {
                    scene: scene.name.clone(),
                    prt: prt.name.clone(),
                    value: prt.value,
                });
            }
            prt.check_structure(&scene.name)?;
            if let Some(target) = prt
                .transition_targets()
                .find(|t| !scene_names.contains(t))
            {
                return Err(QuestionError::UnknownNextScene {
                    scene: scene.name.clone(),
                    prt: prt.name.clone(),
                    target: target.to_string(),
                });
            }
            if !scene.is_end_scene() && prt.required_inputs(scene.input_names()).is_empty() {
                return Err(QuestionError::PrtWithoutInputs {
                    scene: scene.name.clone(),
                    prt: prt.name.clone(),
                });
            }
        }
        Ok(())
    }
}
