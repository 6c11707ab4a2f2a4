//! Potential response trees.
//!
//! A PRT is a binary decision tree of answer tests. Each node runs one test;
//! the true or false branch adjusts score and penalty, appends feedback, may
//! propose a scene transition, and either names the next node or ends the walk.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QuestionError;

/// How repeated visitation scores of one PRT are reduced to a single mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScoreMode {
    /// Highest visitation score.
    #[default]
    Best,
    /// Score of the very first visitation only.
    First,
    /// Sum of the N highest visitation scores.
    BestN(usize),
    /// Evaluated for feedback and transitions but never scored.
    NoScore,
}

impl ScoreMode {
    /// Whether results of this PRT contribute to the grade.
    pub fn is_scored(self) -> bool {
        !matches!(self, Self::NoScore)
    }
}

impl fmt::Display for ScoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::First => write!(f, "first"),
            Self::BestN(n) => write!(f, "bestn[{n}]"),
            Self::NoScore => write!(f, "noscore"),
        }
    }
}

impl FromStr for ScoreMode {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QuestionError::InvalidScoreMode {
            value: s.to_string(),
        };
        match s.trim() {
            "best" => Ok(Self::Best),
            "first" => Ok(Self::First),
            "noscore" => Ok(Self::NoScore),
            other => {
                let n = other
                    .strip_prefix("bestn[")
                    .and_then(|rest| rest.strip_suffix(']'))
                    .ok_or_else(invalid)?
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                Ok(Self::BestN(n))
            }
        }
    }
}

impl TryFrom<String> for ScoreMode {
    type Error = QuestionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScoreMode> for String {
    fn from(mode: ScoreMode) -> Self {
        mode.to_string()
    }
}

/// How a branch combines its score with the running score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoreOp {
    #[default]
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "=")]
    Set,
}

/// The test run at a node, e.g. `AlgEquiv(ans1, x^2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerTest {
    /// Answer test name without the `AT` prefix.
    pub test: String,
    /// Student answer expression.
    pub sans: String,
    /// Teacher answer expression.
    pub tans: String,
    /// Extra test options, passed through as a third argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    /// Suppress the answer test's own feedback.
    #[serde(default)]
    pub quiet: bool,
}

/// One outgoing edge of a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrtBranch {
    #[serde(default)]
    pub score_op: ScoreOp,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub penalty: f64,
    /// Index of the next node, or `None` for a terminal branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub answer_note: String,
    /// Scene to transition to when this branch is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scene: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrtNode {
    #[serde(flatten)]
    pub test: AnswerTest,
    #[serde(rename = "true")]
    pub true_branch: PrtBranch,
    #[serde(rename = "false")]
    pub false_branch: PrtBranch,
}

impl PrtNode {
    pub fn branches(&self) -> [&PrtBranch; 2] {
        [&self.true_branch, &self.false_branch]
    }
}

/// A potential response tree owned by exactly one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prt {
    pub name: String,
    /// Weight of this PRT in the total mark.
    #[serde(default = "default_value")]
    pub value: f64,
    #[serde(default)]
    pub score_mode: ScoreMode,
    /// CAS statements evaluated before the first node.
    #[serde(default)]
    pub feedback_variables: String,
    #[serde(default)]
    pub first_node: usize,
    #[serde(rename = "node")]
    pub nodes: Vec<PrtNode>,
}

fn default_value() -> f64 {
    1.0
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|[A-Za-z_%][A-Za-z0-9_]*"#).expect("static regex is valid")
});

/// Identifiers referenced by a CAS expression, ignoring string literals.
pub fn identifiers(expr: &str) -> BTreeSet<String> {
    IDENTIFIER
        .find_iter(expr)
        .map(|m| m.as_str())
        .filter(|s| !s.starts_with('"'))
        .map(str::to_string)
        .collect()
}

impl Prt {
    /// Every identifier the PRT's expressions mention.
    pub fn referenced_identifiers(&self) -> BTreeSet<String> {
        let mut ids = identifiers(&self.feedback_variables);
        for node in &self.nodes {
            ids.extend(identifiers(&node.test.sans));
            ids.extend(identifiers(&node.test.tans));
            if let Some(options) = &node.test.options {
                ids.extend(identifiers(options));
            }
        }
        ids
    }

    /// The inputs this PRT needs before it can be evaluated.
    pub fn required_inputs<'a, I>(&self, input_names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let referenced = self.referenced_identifiers();
        input_names
            .into_iter()
            .filter(|name| referenced.contains(*name))
            .map(str::to_string)
            .collect()
    }

    /// Scenes any branch of this PRT may transition to.
    pub fn transition_targets(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .flat_map(|n| n.branches())
            .filter_map(|b| b.next_scene.as_deref())
    }

    /// Check node references and acyclicity. Returns the first problem found.
    pub(crate) fn check_structure(&self, scene: &str) -> Result<(), QuestionError> {
        if self.nodes.is_empty() {
            return Err(QuestionError::EmptyPrt {
                scene: scene.into(),
                prt: self.name.clone(),
            });
        }
        let unknown = |target| QuestionError::UnknownNode {
            scene: scene.into(),
            prt: self.name.clone(),
            target,
        };
        if self.first_node >= self.nodes.len() {
            return Err(unknown(self.first_node));
        }
        for node in &self.nodes {
            for branch in node.branches() {
                if let Some(next) = branch.next {
                    if next >= self.nodes.len() {
                        return Err(unknown(next));
                    }
                }
            }
        }

        // Depth-first walk from the root; revisiting a node on the current
        // path is a cycle.
        let mut on_path = vec![false; self.nodes.len()];
        let mut stack = vec![(self.first_node, 0usize)];
        on_path[self.first_node] = true;
        while let Some((node, edge)) = stack.pop() {
            if edge == 2 {
                on_path[node] = false;
                continue;
            }
            stack.push((node, edge + 1));
            if let Some(next) = self.nodes[node].branches()[edge].next {
                if on_path[next] {
                    return Err(QuestionError::PrtCycle {
                        scene: scene.into(),
                        prt: self.name.clone(),
                        node: next,
                    });
                }
                on_path[next] = true;
                stack.push((next, 0));
            }
        }
        Ok(())
    }
}
