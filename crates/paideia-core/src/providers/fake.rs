use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{GenerateOptions, JudgeClient, JudgeRequest, TurnContext, TutorClient};
use crate::errors::GenerateError;
use crate::model::{
    DialogueEvent, Generation, GenerationMeta, JudgeScores, Suggestion,
};

/// Deterministic offline tutor for tests and dry runs. The reply echoes the
/// scenario's expected behavior so required-content checks can be satisfied
/// without a network.
#[derive(Debug, Default)]
pub struct FakeTutorClient;

#[async_trait]
impl TutorClient for FakeTutorClient {
    async fn generate(
        &self,
        ctx: &TurnContext<'_>,
        _opts: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        let mut message = format!(
            "Let's look at this together. What do you already know about {}?",
            ctx.scenario.name.to_lowercase()
        );
        if let Some(expected) = &ctx.scenario.expected_behavior {
            message.push(' ');
            message.push_str(expected);
        }
        for fragment in &ctx.scenario.required_content {
            if !fragment.starts_with("re:") {
                message.push_str(&format!(" (think about the {fragment})"));
            }
        }
        if let Some(action) = ctx.learner_action {
            message.push_str(&format!(" You said: \"{action}\" — walk me through that."));
        }

        let dialogue_trace = if ctx.profile.multi_agent_tutor {
            vec![
                DialogueEvent {
                    role: "ego".into(),
                    content: "Draft: offer a probing question.".into(),
                    round: 1,
                },
                DialogueEvent {
                    role: "superego".into(),
                    content: "Keep it open-ended, no direct answer.".into(),
                    round: 1,
                },
            ]
        } else {
            vec![]
        };

        Ok(Generation {
            suggestions: vec![Suggestion {
                title: None,
                message,
                reason: None,
            }],
            provider: self.provider_name().to_string(),
            model: ctx.profile.model.clone(),
            meta: GenerationMeta {
                latency_ms: Some(5),
                input_tokens: Some(120),
                output_tokens: Some(60),
                dialogue_rounds: if ctx.profile.multi_agent_tutor {
                    Some(1)
                } else {
                    None
                },
                api_calls: Some(1),
                total_cost: Some(0.0),
            },
            dialogue_trace,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Deterministic judge. Ratings are derived from the profile's factor flags
/// (recognition profiles score higher on the recognition dimensions), which
/// gives the ANOVA pipeline a visible main effect to find in smoke tests.
#[derive(Debug, Default)]
pub struct FakeJudgeClient;

#[async_trait]
impl JudgeClient for FakeJudgeClient {
    async fn score(&self, req: &JudgeRequest<'_>) -> anyhow::Result<JudgeScores> {
        let base_rating = if req.profile.multi_agent_tutor { 4.0 } else { 3.0 };
        let recog_rating = if req.profile.recognition { 5.0 } else { 3.0 };

        let mut dimensions = BTreeMap::new();
        for name in [
            "relevance",
            "accuracy",
            "pedagogical_fit",
            "clarity",
            "actionability",
        ] {
            dimensions.insert(name.to_string(), base_rating);
        }
        for name in [
            "responsiveness",
            "attunement",
            "epistemic_respect",
            "adaptivity",
        ] {
            dimensions.insert(name.to_string(), recog_rating);
        }

        Ok(JudgeScores {
            dimensions,
            passes_required: None,
            passes_forbidden: None,
            summary: Some("deterministic fake judgment".into()),
            judge_model: self.judge_model(),
        })
    }

    fn judge_model(&self) -> String {
        "fake-judge".into()
    }
}
