use crate::config::EvalConfig;
use crate::model::{Generation, Profile, ResultRow, Suggestion};
use crate::providers::judge::JudgeService;
use crate::providers::JudgeRequest;
use crate::storage::{ResultFilter, Store};

/// Outcome of a re-judgment pass. `inserted` new rows were written; their
/// originals are kept untouched so the judgment history stays complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejudgeSummary {
    pub examined: u32,
    pub rejudged: u32,
    pub skipped: u32,
}

/// Re-runs the judge over stored generations. Each re-judgment inserts a
/// new result row pointing at its source via `rejudged_from`; nothing is
/// overwritten in place.
pub async fn rejudge_run(
    store: &Store,
    judge: &JudgeService,
    cfg: &EvalConfig,
    run_id: &str,
    filter: &ResultFilter,
) -> anyhow::Result<RejudgeSummary> {
    anyhow::ensure!(judge.is_enabled(), "re-judgment requires a judge client");
    store
        .get_run(run_id)?
        .ok_or_else(|| anyhow::anyhow!("run not found: {run_id}"))?;

    let mut summary = RejudgeSummary::default();
    for stored in store.get_results(run_id, filter)? {
        summary.examined += 1;
        let row = &stored.row;
        if !row.success {
            summary.skipped += 1;
            continue;
        }
        let Ok(suggestions) =
            serde_json::from_value::<Vec<Suggestion>>(row.suggestions.clone())
        else {
            tracing::warn!(result_id = stored.id, "no stored generation, skipping");
            summary.skipped += 1;
            continue;
        };
        let Some(scenario) = cfg.scenarios.iter().find(|s| s.id == row.scenario_id) else {
            tracing::warn!(
                result_id = stored.id,
                scenario = %row.scenario_id,
                "scenario no longer in config, skipping"
            );
            summary.skipped += 1;
            continue;
        };

        let profile = profile_from_row(row);
        let generation = Generation {
            suggestions,
            provider: row.provider.clone(),
            model: row.model.clone(),
            meta: Default::default(),
            dialogue_trace: vec![],
        };
        // Single-turn re-judgment: the stored final suggestions are rated as
        // one opening-turn request. Per-turn dialogue records live in
        // `details` and are not replayed.
        let verdict = judge
            .judge(&JudgeRequest {
                scenario,
                profile: &profile,
                turn: 0,
                learner_action: None,
                history: &[],
                generation: &generation,
            })
            .await;

        let mut new_row = row.clone();
        new_row.overall_score = verdict.overall;
        new_row.base_score = verdict.base;
        new_row.recognition_score = verdict.recognition;
        new_row.scoring_method = verdict.method;
        new_row.passes_required = verdict.passes_required;
        new_row.passes_forbidden = verdict.passes_forbidden;
        new_row.judge_model = verdict.judge_model;
        new_row.rejudged_from = Some(stored.id);
        store.insert_result(run_id, &new_row)?;
        summary.rejudged += 1;
    }
    Ok(summary)
}

/// The configuration identity was persisted with the result, so re-judgment
/// does not depend on the profile still existing in the config file.
fn profile_from_row(row: &ResultRow) -> Profile {
    Profile {
        name: row.profile_name.clone(),
        provider: row.provider.clone(),
        model: row.model.clone(),
        ego_model: row.ego_model.clone(),
        superego_model: row.superego_model.clone(),
        recognition: row.recognition,
        multi_agent_tutor: row.multi_agent_tutor,
        multi_agent_learner: row.multi_agent_learner,
        options: serde_json::Value::Null,
    }
}
