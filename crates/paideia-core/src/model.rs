use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_content: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_turns: Vec<FollowUpTurn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Scenario {
    /// Total turns for one slot: the opening turn plus every follow-up.
    pub fn turn_count(&self) -> u32 {
        1 + self.follow_up_turns.len() as u32
    }

    pub fn threshold_for_turn(&self, turn: u32, default: f64) -> f64 {
        if turn == 0 {
            return self.min_score.unwrap_or(default);
        }
        self.follow_up_turns
            .get(turn as usize - 1)
            .and_then(|f| f.min_score)
            .or(self.min_score)
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTurn {
    pub learner_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ego_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superego_model: Option<String>,
    #[serde(default)]
    pub recognition: bool,
    #[serde(default)]
    pub multi_agent_tutor: bool,
    #[serde(default)]
    pub multi_agent_learner: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

impl Profile {
    pub fn factor_key(&self) -> FactorKey {
        FactorKey {
            recognition: self.recognition,
            tutor: self.multi_agent_tutor,
            learner: self.multi_agent_learner,
        }
    }
}

/// One cell of the 2x2x2 design: recognition framing, multi-agent tutor,
/// dynamic learner.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FactorKey {
    pub recognition: bool,
    pub tutor: bool,
    pub learner: bool,
}

impl FactorKey {
    pub fn label(&self) -> String {
        format!(
            "r{}_t{}_l{}",
            self.recognition as u8, self.tutor as u8, self.learner as u8
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() != 8 || b[0] != b'r' || b[2] != b'_' || b[3] != b't' || b[5] != b'_' || b[6] != b'l'
        {
            return None;
        }
        let bit = |c: u8| match c {
            b'0' => Some(false),
            b'1' => Some(true),
            _ => None,
        };
        Some(FactorKey {
            recognition: bit(b[1])?,
            tutor: bit(b[4])?,
            learner: bit(b[7])?,
        })
    }

    pub fn all() -> [FactorKey; 8] {
        let mut out = [FactorKey::default(); 8];
        let mut i = 0;
        for recognition in [false, true] {
            for tutor in [false, true] {
                for learner in [false, true] {
                    out[i] = FactorKey {
                        recognition,
                        tutor,
                        learner,
                    };
                    i += 1;
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            _ => RunStatus::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub description: String,
    pub status: RunStatus,
    pub scenario_count: u32,
    pub profile_count: u32,
    pub total_tests: u32,
    #[serde(default)]
    pub scope: Option<RunScope>,
    pub started_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// The requested extent of a run, written once at creation. Resume trusts
/// this over anything inferred from persisted results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunScope {
    pub repetitions: u32,
    pub scenario_ids: Vec<String>,
    pub profile_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub overrides: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Rubric,
    JudgeFailed,
    #[default]
    Skipped,
    PartialJudgeFailure,
    Mixed,
}

impl ScoringMethod {
    pub fn parse(s: &str) -> Self {
        match s {
            "rubric" => ScoringMethod::Rubric,
            "judge_failed" => ScoringMethod::JudgeFailed,
            "skipped" => ScoringMethod::Skipped,
            "partial_judge_failure" => ScoringMethod::PartialJudgeFailure,
            "mixed" => ScoringMethod::Mixed,
            _ => ScoringMethod::JudgeFailed, // Default fallback
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Rubric => "rubric",
            ScoringMethod::JudgeFailed => "judge_failed",
            ScoringMethod::Skipped => "skipped",
            ScoringMethod::PartialJudgeFailure => "partial_judge_failure",
            ScoringMethod::Mixed => "mixed",
        }
    }
}

/// One persisted evaluation outcome. Rows are append-only; a re-judgment
/// inserts a new row pointing at its source via `rejudged_from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub scenario_id: String,
    pub scenario_name: String,
    pub profile_name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub ego_model: Option<String>,
    #[serde(default)]
    pub superego_model: Option<String>,
    pub recognition: bool,
    pub multi_agent_tutor: bool,
    pub multi_agent_learner: bool,
    pub repetition: u32,
    pub success: bool,
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub base_score: Option<f64>,
    #[serde(default)]
    pub recognition_score: Option<f64>,
    pub scoring_method: ScoringMethod,
    #[serde(default)]
    pub passes_required: Option<bool>,
    #[serde(default)]
    pub passes_forbidden: Option<bool>,
    pub turn_count: u32,
    #[serde(default)]
    pub all_turns_passed: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub judge_model: Option<String>,
    #[serde(default)]
    pub suggestions: serde_json::Value,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub rejudged_from: Option<i64>,
}

impl ResultRow {
    pub fn factor_key(&self) -> FactorKey {
        FactorKey {
            recognition: self.recognition,
            tutor: self.multi_agent_tutor,
            learner: self.multi_agent_learner,
        }
    }
}

/// Per-turn record embedded in `ResultRow::details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRow {
    pub turn: u32,
    #[serde(default)]
    pub learner_action: Option<String>,
    pub score: Option<f64>,
    #[serde(default)]
    pub base_score: Option<f64>,
    #[serde(default)]
    pub recognition_score: Option<f64>,
    pub scoring_method: ScoringMethod,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimensions: BTreeMap<String, f64>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub judge_summary: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
}

/// One unit of schedulable work: indexes into the run's profile and
/// scenario lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestSlot {
    pub profile_idx: usize,
    pub scenario_idx: usize,
    pub repetition: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Generation {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub meta: GenerationMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dialogue_trace: Vec<DialogueEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMeta {
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub dialogue_rounds: Option<u32>,
    #[serde(default)]
    pub api_calls: Option<u32>,
    #[serde(default)]
    pub total_cost: Option<f64>,
}

/// One internal exchange from a multi-agent tutor (ego/superego rounds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueEvent {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub round: u32,
}

/// Raw judge output: rubric dimensions on the 1-5 scale, before any
/// composite aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeScores {
    pub dimensions: BTreeMap<String, f64>,
    #[serde(default)]
    pub passes_required: Option<bool>,
    #[serde(default)]
    pub passes_forbidden: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
    pub judge_model: String,
}

pub fn default_min_score() -> f64 {
    70.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_key_label_round_trips() {
        for key in FactorKey::all() {
            assert_eq!(FactorKey::parse(&key.label()), Some(key));
        }
        assert_eq!(
            FactorKey {
                recognition: true,
                tutor: false,
                learner: true
            }
            .label(),
            "r1_t0_l1"
        );
        assert_eq!(FactorKey::parse("r2_t0_l0"), None);
        assert_eq!(FactorKey::parse("r1_t0"), None);
    }

    #[test]
    fn turn_threshold_prefers_most_specific() {
        let scenario = Scenario {
            id: "s1".into(),
            name: "S1".into(),
            category: None,
            context: "ctx".into(),
            expected_behavior: None,
            required_content: vec![],
            forbidden_content: vec![],
            min_score: Some(60.0),
            follow_up_turns: vec![
                FollowUpTurn {
                    learner_action: "asks why".into(),
                    min_score: Some(80.0),
                },
                FollowUpTurn {
                    learner_action: "pushes back".into(),
                    min_score: None,
                },
            ],
            tags: vec![],
        };
        assert_eq!(scenario.turn_count(), 3);
        assert_eq!(scenario.threshold_for_turn(0, 70.0), 60.0);
        assert_eq!(scenario.threshold_for_turn(1, 70.0), 80.0);
        assert_eq!(scenario.threshold_for_turn(2, 70.0), 60.0);
    }
}
