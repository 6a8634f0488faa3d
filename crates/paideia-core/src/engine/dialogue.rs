use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::engine::retry::{with_backoff, RetryPolicy};
use crate::model::{Profile, ResultRow, Scenario, ScoringMethod, TurnRow};
use crate::providers::judge::JudgeService;
use crate::providers::{
    DirectiveSynthesizer, GenerateOptions, HistoryEntry, JudgeRequest, TurnContext, TutorClient,
};
use crate::scoring::mean_of_present;

pub struct DialogueDeps {
    pub tutor: Arc<dyn TutorClient>,
    pub judge: JudgeService,
    pub synthesizer: Arc<dyn DirectiveSynthesizer>,
    pub retry: RetryPolicy,
    pub default_min_score: f64,
    pub timeout: Option<Duration>,
}

/// Runs one slot: the opening turn plus every follow-up, all through the
/// same generate+evaluate step. Multi-turn is single-turn iterated with
/// accumulated context, not a separate generation mode. A failed generation
/// aborts the slot; a failed judgment does not (the turn just has no score).
pub async fn run_slot(
    deps: &DialogueDeps,
    scenario: &Scenario,
    profile: &Profile,
    repetition: u32,
) -> ResultRow {
    let total_turns = scenario.turn_count();
    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut turns: Vec<TurnRow> = Vec::new();
    let mut directive: Option<String> = None;
    let mut latency_ms = 0u64;
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut saw_tokens = false;
    let mut last_generation = None;
    let mut judge_model = None;
    let mut passes_required: Option<bool> = None;
    let mut passes_forbidden: Option<bool> = None;

    for turn in 0..total_turns {
        let learner_action = if turn == 0 {
            None
        } else {
            Some(
                scenario.follow_up_turns[turn as usize - 1]
                    .learner_action
                    .as_str(),
            )
        };

        let ctx = TurnContext {
            scenario,
            profile,
            turn,
            history: &history,
            learner_action,
            directive: directive.as_deref(),
        };
        let opts = GenerateOptions {
            timeout: deps.timeout,
            temperature: None,
            max_tokens: None,
            extra: profile.options.clone(),
        };

        let generation =
            match with_backoff(&deps.retry, || deps.tutor.generate(&ctx, &opts)).await {
                Ok(g) => g,
                Err(e) => {
                    // one failed turn fails the whole slot; a multi-turn
                    // scenario cannot skip a turn and still claim success
                    return failed_row(
                        scenario,
                        profile,
                        repetition,
                        turns,
                        format!("turn {turn}: {e}"),
                    );
                }
            };

        if let Some(ms) = generation.meta.latency_ms {
            latency_ms += ms;
        }
        if let Some(t) = generation.meta.input_tokens {
            input_tokens += t;
            saw_tokens = true;
        }
        if let Some(t) = generation.meta.output_tokens {
            output_tokens += t;
            saw_tokens = true;
        }

        let verdict = deps
            .judge
            .judge(&JudgeRequest {
                scenario,
                profile,
                turn,
                learner_action,
                history: &history,
                generation: &generation,
            })
            .await;

        if verdict.judge_model.is_some() {
            judge_model = verdict.judge_model.clone();
        }
        passes_required = and_opt(passes_required, verdict.passes_required);
        passes_forbidden = and_opt(passes_forbidden, verdict.passes_forbidden);

        let threshold = scenario.threshold_for_turn(turn, deps.default_min_score);
        turns.push(TurnRow {
            turn,
            learner_action: learner_action.map(str::to_string),
            score: verdict.overall,
            base_score: verdict.base,
            recognition_score: verdict.recognition,
            scoring_method: verdict.method,
            dimensions: verdict.dimensions,
            passed: verdict.overall.map(|s| s >= threshold),
            judge_summary: verdict.summary,
            directive: directive.clone(),
        });

        history.push(HistoryEntry {
            turn,
            learner_action: learner_action.map(str::to_string),
            suggestions: generation.suggestions.clone(),
        });
        last_generation = Some(generation);

        // session evolution directive for the next turn, if a synthesizer
        // is installed and there is a next turn
        directive = None;
        if turn + 1 < total_turns {
            match deps.synthesizer.synthesize(&history).await {
                Ok(d) => directive = d,
                Err(e) => {
                    tracing::warn!(scenario = %scenario.id, error = %e, "directive synthesis failed, continuing without");
                }
            }
        }
    }

    let overall = mean_of_present(&turns.iter().map(|t| t.score).collect::<Vec<_>>());
    let base = mean_of_present(&turns.iter().map(|t| t.base_score).collect::<Vec<_>>());
    let recognition =
        mean_of_present(&turns.iter().map(|t| t.recognition_score).collect::<Vec<_>>());
    let all_turns_passed = Some(turns.iter().all(|t| t.passed == Some(true)));
    let scoring_method = combine_methods(&turns);

    let (suggestions, details) = slot_payloads(&turns, last_generation.as_ref());
    let last = last_generation.unwrap_or_default();

    ResultRow {
        scenario_id: scenario.id.clone(),
        scenario_name: scenario.name.clone(),
        profile_name: profile.name.clone(),
        provider: last.provider,
        model: if last.model.is_empty() {
            profile.model.clone()
        } else {
            last.model
        },
        ego_model: profile.ego_model.clone(),
        superego_model: profile.superego_model.clone(),
        recognition: profile.recognition,
        multi_agent_tutor: profile.multi_agent_tutor,
        multi_agent_learner: profile.multi_agent_learner,
        repetition,
        success: true,
        latency_ms: Some(latency_ms),
        input_tokens: saw_tokens.then_some(input_tokens),
        output_tokens: saw_tokens.then_some(output_tokens),
        overall_score: overall,
        base_score: base,
        recognition_score: recognition,
        scoring_method,
        passes_required,
        passes_forbidden,
        turn_count: total_turns,
        all_turns_passed,
        error: None,
        judge_model,
        suggestions,
        details,
        rejudged_from: None,
    }
}

/// Slot-level method from the per-turn methods: uniform tags keep their tag,
/// a rubric/judge-failed mix is a partial failure, anything else is mixed.
fn combine_methods(turns: &[TurnRow]) -> ScoringMethod {
    let mut rubric = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;
    for t in turns {
        match t.scoring_method {
            ScoringMethod::Rubric => rubric += 1,
            ScoringMethod::JudgeFailed => failed += 1,
            ScoringMethod::Skipped => skipped += 1,
            ScoringMethod::PartialJudgeFailure | ScoringMethod::Mixed => {
                return ScoringMethod::Mixed
            }
        }
    }
    match (rubric, failed, skipped) {
        (0, 0, _) => ScoringMethod::Skipped,
        (r, 0, 0) if r > 0 => ScoringMethod::Rubric,
        (0, f, 0) if f > 0 => ScoringMethod::JudgeFailed,
        (r, f, 0) if r > 0 && f > 0 => ScoringMethod::PartialJudgeFailure,
        _ => ScoringMethod::Mixed,
    }
}

fn and_opt(acc: Option<bool>, next: Option<bool>) -> Option<bool> {
    match (acc, next) {
        (None, n) => n,
        (a, None) => a,
        (Some(a), Some(n)) => Some(a && n),
    }
}

fn slot_payloads(
    turns: &[TurnRow],
    last: Option<&crate::model::Generation>,
) -> (serde_json::Value, serde_json::Value) {
    let suggestions = last
        .map(|g| serde_json::to_value(&g.suggestions).unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);
    let mut details = json!({ "turns": turns });
    if let Some(g) = last {
        if !g.dialogue_trace.is_empty() {
            details["dialogue_trace"] =
                serde_json::to_value(&g.dialogue_trace).unwrap_or(serde_json::Value::Null);
        }
    }
    (suggestions, details)
}

fn failed_row(
    scenario: &Scenario,
    profile: &Profile,
    repetition: u32,
    turns: Vec<TurnRow>,
    error: String,
) -> ResultRow {
    let (suggestions, details) = slot_payloads(&turns, None);
    ResultRow {
        scenario_id: scenario.id.clone(),
        scenario_name: scenario.name.clone(),
        profile_name: profile.name.clone(),
        provider: profile.provider.clone(),
        model: profile.model.clone(),
        ego_model: profile.ego_model.clone(),
        superego_model: profile.superego_model.clone(),
        recognition: profile.recognition,
        multi_agent_tutor: profile.multi_agent_tutor,
        multi_agent_learner: profile.multi_agent_learner,
        repetition,
        success: false,
        latency_ms: None,
        input_tokens: None,
        output_tokens: None,
        overall_score: None,
        base_score: None,
        recognition_score: None,
        scoring_method: ScoringMethod::Skipped,
        passes_required: None,
        passes_forbidden: None,
        turn_count: scenario.turn_count(),
        all_turns_passed: Some(false),
        error: Some(error),
        judge_model: None,
        suggestions,
        details,
        rejudged_from: None,
    }
}
