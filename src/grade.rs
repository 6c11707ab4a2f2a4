//! Grading aggregator.
//!
//! Reduces the full attempt history (every scene visited, and every stored
//! PRT result made while there) to one normalized score. Pure: the result
//! depends only on the question's PRT configuration and the history passed in.

use std::collections::BTreeMap;
use std::iter;

use serde::{Deserialize, Serialize};

use crate::engine::PrtOutcome;
use crate::error::{GradeError, GradeResult};
use crate::question::{Question, ScoreMode};

/// Penalties accumulated within one scene visit never exceed this.
pub const MAX_PENALTY: f64 = 1.0;

/// One entry of the scene path with the submissions made during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneVisit {
    pub scene: String,
    /// One map per submission, PRT name to stored tuple, in submission order.
    #[serde(default)]
    pub attempts: Vec<BTreeMap<String, String>>,
}

impl SceneVisit {
    pub fn new(scene: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            attempts: Vec::new(),
        }
    }
}

/// The grading input, kept aligned with `SCENE_PATH` plus the current scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptHistory {
    visits: Vec<SceneVisit>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> &[SceneVisit] {
        &self.visits
    }

    /// Align visits with `path` followed by `current`. Visits whose scene
    /// still matches keep their recorded attempts.
    pub fn sync_path(&mut self, path: &[String], current: &str) {
        let names: Vec<&str> = path
            .iter()
            .map(String::as_str)
            .chain(iter::once(current))
            .collect();
        self.visits.truncate(names.len());
        for (i, name) in names.into_iter().enumerate() {
            match self.visits.get_mut(i) {
                Some(visit) if visit.scene == name => {}
                Some(visit) => *visit = SceneVisit::new(name),
                None => self.visits.push(SceneVisit::new(name)),
            }
        }
    }

    /// Store one submission's results for the visit at `sequence`.
    pub fn record(&mut self, sequence: usize, scene: &str, attempt: BTreeMap<String, String>) {
        while self.visits.len() <= sequence {
            self.visits.push(SceneVisit::new(scene));
        }
        let visit = &mut self.visits[sequence];
        if visit.scene != scene {
            *visit = SceneVisit::new(scene);
        }
        visit.attempts.push(attempt);
    }

    pub fn grade(&self, question: &Question, apply_penalties: bool) -> GradeResult<f64> {
        evaluate_total_grade(question, &self.visits, apply_penalties)
    }
}

/// Breakdown of a grading run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    /// Final score, `weighted_sum / max_mark`, or 0 for a zero-mark question.
    pub total: f64,
    pub weighted_sum: f64,
    pub max_mark: f64,
    /// Aggregate per `scene/prt` key, absent when the aggregate is unscored.
    pub aggregates: BTreeMap<String, f64>,
    /// Visitation scores per `scene/prt` key, in path order; `None` for a
    /// visit without a scored attempt.
    pub visitations: BTreeMap<String, Vec<Option<f64>>>,
}

/// Final normalized score for an attempt history.
pub fn evaluate_total_grade(
    question: &Question,
    visits: &[SceneVisit],
    apply_penalties: bool,
) -> GradeResult<f64> {
    grade_report(question, visits, apply_penalties).map(|report| report.total)
}

pub fn grade_report(
    question: &Question,
    visits: &[SceneVisit],
    apply_penalties: bool,
) -> GradeResult<GradeReport> {
    let mut visitations: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    // scene/prt -> (value, mode)
    let mut weights: BTreeMap<String, (f64, ScoreMode)> = BTreeMap::new();

    for (index, visit) in visits.iter().enumerate() {
        let scene = question
            .scene_by_name(&visit.scene)
            .ok_or_else(|| GradeError::UnknownScene {
                index,
                scene: visit.scene.clone(),
            })?;

        for prt in scene.prts.iter().filter(|p| p.score_mode.is_scored()) {
            let malformed = |message: String| GradeError::MalformedResult {
                index,
                prt: prt.name.clone(),
                message,
            };

            let mut penalty = 0.0_f64;
            let mut best: Option<f64> = None;
            for attempt in &visit.attempts {
                let Some(stored) = attempt.get(&prt.name) else {
                    continue;
                };
                let outcome = PrtOutcome::parse(stored).map_err(|e| malformed(e.to_string()))?;
                if !outcome.is_complete() {
                    continue;
                }
                let mut score = outcome
                    .score()
                    .ok_or_else(|| malformed("score is not a number".into()))?;
                if apply_penalties {
                    let delta = outcome
                        .penalty()
                        .ok_or_else(|| malformed("penalty is not a number".into()))?;
                    penalty = (penalty + delta).min(MAX_PENALTY);
                    score = (score - penalty).max(0.0);
                }
                if best.is_none_or(|b| score > b) {
                    best = Some(score);
                }
            }

            // An unscored visit still occupies its slot so `first` sees it.
            let key = format!("{}/{}", scene.name, prt.name);
            weights.insert(key.clone(), (prt.value, prt.score_mode));
            visitations.entry(key).or_default().push(best);
        }
    }

    let mut aggregates = BTreeMap::new();
    let mut weighted_sum = 0.0;
    for (key, scores) in &visitations {
        let Some(&(value, mode)) = weights.get(key) else {
            continue;
        };
        if let Some(aggregate) = aggregate(mode, scores) {
            weighted_sum += aggregate * value;
            aggregates.insert(key.clone(), aggregate);
        }
    }

    let max_mark = question.default_mark;
    let total = if max_mark == 0.0 {
        0.0
    } else {
        weighted_sum / max_mark
    };

    tracing::debug!(
        question = %question.name,
        visits = visits.len(),
        weighted_sum,
        total,
        "graded attempt"
    );

    Ok(GradeReport {
        total,
        weighted_sum,
        max_mark,
        aggregates,
        visitations,
    })
}

/// Reduce visitation scores by score mode. `None` entries are visits without
/// a scored attempt; the result is `None` when nothing counts.
///
/// `first` looks at the first visit only, so an unscored first visit leaves
/// the PRT out of the total even if later visits scored.
pub fn aggregate(mode: ScoreMode, scores: &[Option<f64>]) -> Option<f64> {
    let mut scored = scores.iter().flatten().copied();
    match mode {
        ScoreMode::Best => scored.reduce(f64::max),
        ScoreMode::First => scores.first().copied().flatten(),
        ScoreMode::BestN(n) => {
            let mut sorted: Vec<f64> = scored.collect();
            if sorted.is_empty() {
                return None;
            }
            sorted.sort_by(|a, b| b.total_cmp(a));
            Some(sorted.iter().take(n).sum())
        }
        ScoreMode::NoScore => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_modes() {
        let scores = [Some(0.2), Some(0.9), None, Some(0.5)];
        assert_eq!(aggregate(ScoreMode::Best, &scores), Some(0.9));
        assert_eq!(aggregate(ScoreMode::First, &scores), Some(0.2));
        assert_eq!(aggregate(ScoreMode::BestN(2), &scores), Some(0.9 + 0.5));
        assert_eq!(aggregate(ScoreMode::BestN(5), &scores), Some(0.9 + 0.5 + 0.2));
        assert_eq!(aggregate(ScoreMode::NoScore, &scores), None);
        assert_eq!(aggregate(ScoreMode::Best, &[]), None);
    }

    #[test]
    fn unscored_visits_count_only_for_first() {
        let scores = [None, Some(0.8)];
        assert_eq!(aggregate(ScoreMode::First, &scores), None);
        assert_eq!(aggregate(ScoreMode::Best, &scores), Some(0.8));
        assert_eq!(aggregate(ScoreMode::BestN(3), &scores), Some(0.8));
        assert_eq!(aggregate(ScoreMode::BestN(3), &[None, None]), None);
    }

    #[test]
    fn sync_path_keeps_matching_visits() {
        let mut history = AttemptHistory::new();
        history.record(0, "entry", BTreeMap::from([("p1".into(), "[[],\"\",1,0]".into())]));
        history.sync_path(&["entry".to_string()], "second");
        assert_eq!(history.visits().len(), 2);
        assert_eq!(history.visits()[0].attempts.len(), 1);
        assert_eq!(history.visits()[1].scene, "second");
        assert!(history.visits()[1].attempts.is_empty());
    }

    #[test]
    fn record_fills_missing_visits() {
        let mut history = AttemptHistory::new();
        history.record(1, "second", BTreeMap::new());
        assert_eq!(history.visits().len(), 2);
        assert_eq!(history.visits()[1].attempts.len(), 1);
    }
}
