use async_trait::async_trait;

use crate::errors::GenerateError;
use crate::model::{Generation, JudgeScores, Profile, Scenario, Suggestion};

pub mod fake;
pub mod http;
pub mod judge;

/// Everything the tutor sees for one turn: the scenario, the configuration
/// under test, and the conversation so far.
pub struct TurnContext<'a> {
    pub scenario: &'a Scenario,
    pub profile: &'a Profile,
    pub turn: u32,
    pub history: &'a [HistoryEntry],
    /// The learner's follow-up action for this turn; `None` on the opening
    /// turn.
    pub learner_action: Option<&'a str>,
    /// Session evolution directive folded in by the synthesizer, if any.
    pub directive: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub turn: u32,
    pub learner_action: Option<String>,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub timeout: Option<std::time::Duration>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Profile options plus anything a collaborator folded in.
    pub extra: serde_json::Value,
}

#[async_trait]
pub trait TutorClient: Send + Sync {
    async fn generate(
        &self,
        ctx: &TurnContext<'_>,
        opts: &GenerateOptions,
    ) -> Result<Generation, GenerateError>;
    fn provider_name(&self) -> &'static str;
}

pub struct JudgeRequest<'a> {
    pub scenario: &'a Scenario,
    pub profile: &'a Profile,
    pub turn: u32,
    pub learner_action: Option<&'a str>,
    pub history: &'a [HistoryEntry],
    pub generation: &'a Generation,
}

#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Raw rubric ratings on the 1-5 scale. Composite math happens in
    /// [`judge::JudgeService`], not here.
    async fn score(&self, req: &JudgeRequest<'_>) -> anyhow::Result<JudgeScores>;
    fn judge_model(&self) -> String;
}

/// Derives a session evolution directive between turns. Domain heuristics
/// live behind this seam; the engine only folds the text into the next
/// turn's context.
#[async_trait]
pub trait DirectiveSynthesizer: Send + Sync {
    async fn synthesize(&self, history: &[HistoryEntry]) -> anyhow::Result<Option<String>>;
}

pub struct NoopSynthesizer;

#[async_trait]
impl DirectiveSynthesizer for NoopSynthesizer {
    async fn synthesize(&self, _history: &[HistoryEntry]) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Renders the accumulated dialogue into one prompt block: scenario context,
/// every prior exchange, then the current learner action.
pub fn render_turn_prompt(ctx: &TurnContext<'_>) -> String {
    let mut out = String::new();
    out.push_str(&ctx.scenario.context);
    if let Some(expected) = &ctx.scenario.expected_behavior {
        out.push_str("\n\nWhat a good tutor would do: ");
        out.push_str(expected);
    }
    if !ctx.history.is_empty() {
        out.push_str("\n\nConversation so far:");
        for entry in ctx.history {
            if let Some(action) = &entry.learner_action {
                out.push_str("\nLearner: ");
                out.push_str(action);
            }
            for s in &entry.suggestions {
                out.push_str("\nTutor: ");
                if let Some(title) = &s.title {
                    out.push_str(title);
                    out.push_str(": ");
                }
                out.push_str(&s.message);
            }
        }
    }
    if let Some(action) = ctx.learner_action {
        out.push_str("\n\nThe learner now: ");
        out.push_str(action);
    }
    if let Some(directive) = ctx.directive {
        out.push_str("\n\nSession directive: ");
        out.push_str(directive);
    }
    out
}
