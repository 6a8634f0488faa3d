use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ResumeError;
use crate::ids::new_run_id;
use crate::model::{Profile, RunRecord, RunScope, RunStatus, Scenario};
use crate::storage::Store;

/// Creates and persists the run record. The full scope (scenario ids,
/// profile names, repetitions, owner pid) is embedded at creation time so a
/// later resume never has to guess it from partial results.
pub fn create_run(
    store: &Store,
    description: &str,
    scenarios: &[Scenario],
    profiles: &[Profile],
    repetitions: u32,
    overrides: serde_json::Value,
) -> anyhow::Result<RunRecord> {
    let scope = RunScope {
        repetitions,
        scenario_ids: scenarios.iter().map(|s| s.id.clone()).collect(),
        profile_names: profiles.iter().map(|p| p.name.clone()).collect(),
        owner_pid: Some(std::process::id()),
        overrides,
    };
    let run = RunRecord {
        id: new_run_id(description),
        description: description.to_string(),
        status: RunStatus::Running,
        scenario_count: scenarios.len() as u32,
        profile_count: profiles.len() as u32,
        total_tests: (scenarios.len() * profiles.len()) as u32 * repetitions,
        scope: Some(scope),
        started_at: chrono::Utc::now().to_rfc3339(),
        completed_at: None,
    };
    store.create_run(&run)?;
    Ok(run)
}

/// What resume decided to do: the recovered scope plus the successful-work
/// accounting. `already_complete` means every (profile, scenario) pair has
/// its requested repetitions and no write should happen.
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub run: RunRecord,
    pub scope: RunScope,
    /// successful repetition indices per (profile_name, scenario_id)
    pub successful: BTreeMap<(String, String), BTreeSet<u32>>,
    pub already_complete: bool,
    /// scope came from the legacy results-inference fallback
    pub inferred_scope: bool,
}

pub fn plan_resume(store: &Store, run_id: &str, force: bool) -> Result<ResumePlan, ResumeError> {
    let run = store
        .get_run(run_id)
        .map_err(ResumeError::Other)?
        .ok_or_else(|| ResumeError::RunNotFound(run_id.to_string()))?;

    let (scope, inferred_scope) = match run.scope.clone() {
        Some(scope) => (scope, false),
        None => (infer_scope(store, run_id)?, true),
    };

    check_owner(run_id, scope.owner_pid, std::process::id(), force, pid_alive)?;

    let successful = store
        .successful_repetitions(run_id)
        .map_err(ResumeError::Other)?;
    let already_complete = scope.scenario_ids.iter().all(|sid| {
        scope.profile_names.iter().all(|pname| {
            let done = successful.get(&(pname.clone(), sid.clone()));
            (0..scope.repetitions).all(|rep| done.is_some_and(|set| set.contains(&rep)))
        })
    });

    Ok(ResumePlan {
        run,
        scope,
        successful,
        already_complete,
        inferred_scope,
    })
}

/// The lock check, probe injected for testability. Another process may
/// resume only when the recorded owner is dead or `force` is set.
pub fn check_owner(
    run_id: &str,
    owner_pid: Option<u32>,
    self_pid: u32,
    force: bool,
    alive: impl Fn(u32) -> bool,
) -> Result<(), ResumeError> {
    let Some(owner) = owner_pid else {
        return Ok(());
    };
    if owner == self_pid || force {
        return Ok(());
    }
    if alive(owner) {
        return Err(ResumeError::LockHeld {
            run_id: run_id.to_string(),
            owner_pid: owner,
        });
    }
    Ok(())
}

/// Non-destructive liveness probe: `/proc/<pid>` where it exists, a signal-0
/// `kill` otherwise. Unknown or unreachable counts as dead.
pub fn pid_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        return std::path::Path::new(&format!("/proc/{pid}")).exists();
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Legacy fallback for runs persisted before scope was recorded: scenarios
/// and profiles come from the distinct values in the results, the requested
/// repetition count from the highest repetition index seen.
fn infer_scope(store: &Store, run_id: &str) -> Result<RunScope, ResumeError> {
    let results = store
        .get_results(run_id, &Default::default())
        .map_err(ResumeError::Other)?;
    if results.is_empty() {
        return Err(ResumeError::ScopeUnknown(run_id.to_string()));
    }
    tracing::warn!(
        run_id,
        "run has no recorded scope; inferring from existing results"
    );
    let mut scenario_ids: Vec<String> = Vec::new();
    let mut profile_names: Vec<String> = Vec::new();
    let mut max_repetition = 0u32;
    for r in &results {
        if !scenario_ids.contains(&r.row.scenario_id) {
            scenario_ids.push(r.row.scenario_id.clone());
        }
        if !profile_names.contains(&r.row.profile_name) {
            profile_names.push(r.row.profile_name.clone());
        }
        max_repetition = max_repetition.max(r.row.repetition);
    }
    Ok(RunScope {
        repetitions: max_repetition + 1,
        scenario_ids,
        profile_names,
        owner_pid: None,
        overrides: serde_json::Value::Null,
    })
}

/// Marks the run completed. `total_tests` is deliberately left as written
/// at creation so expected-vs-actual stays comparable afterwards.
pub fn finalize(store: &Store, run_id: &str) -> anyhow::Result<()> {
    store.finalize_run(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultRow, ScoringMethod};

    fn scenario(id: &str) -> Scenario {
        Scenario {
            id: id.into(),
            name: id.to_uppercase(),
            category: None,
            context: "ctx".into(),
            expected_behavior: None,
            required_content: vec![],
            forbidden_content: vec![],
            min_score: None,
            follow_up_turns: vec![],
            tags: vec![],
        }
    }

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.into(),
            provider: "fake".into(),
            model: "m".into(),
            ego_model: None,
            superego_model: None,
            recognition: false,
            multi_agent_tutor: false,
            multi_agent_learner: false,
            options: serde_json::Value::Null,
        }
    }

    fn result(scenario: &str, profile: &str, repetition: u32, success: bool) -> ResultRow {
        ResultRow {
            scenario_id: scenario.into(),
            scenario_name: scenario.to_uppercase(),
            profile_name: profile.into(),
            provider: "fake".into(),
            model: "m".into(),
            ego_model: None,
            superego_model: None,
            recognition: false,
            multi_agent_tutor: false,
            multi_agent_learner: false,
            repetition,
            success,
            latency_ms: None,
            input_tokens: None,
            output_tokens: None,
            overall_score: success.then_some(80.0),
            base_score: None,
            recognition_score: None,
            scoring_method: if success {
                ScoringMethod::Rubric
            } else {
                ScoringMethod::Skipped
            },
            passes_required: None,
            passes_forbidden: None,
            turn_count: 1,
            all_turns_passed: None,
            error: (!success).then(|| "boom".into()),
            judge_model: None,
            suggestions: serde_json::Value::Null,
            details: serde_json::Value::Null,
            rejudged_from: None,
        }
    }

    fn seeded_store() -> (Store, RunRecord) {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let run = create_run(
            &store,
            "pilot",
            &[scenario("s1"), scenario("s2")],
            &[profile("p1")],
            2,
            serde_json::Value::Null,
        )
        .unwrap();
        (store, run)
    }

    #[test]
    fn scope_is_written_at_creation() {
        let (store, run) = seeded_store();
        assert_eq!(run.total_tests, 4);
        let loaded = store.get_run(&run.id).unwrap().unwrap();
        let scope = loaded.scope.unwrap();
        assert_eq!(scope.repetitions, 2);
        assert_eq!(scope.scenario_ids, vec!["s1", "s2"]);
        assert_eq!(scope.profile_names, vec!["p1"]);
        assert_eq!(scope.owner_pid, Some(std::process::id()));
    }

    #[test]
    fn failed_attempts_are_retried_on_resume() {
        let (store, run) = seeded_store();
        store.insert_result(&run.id, &result("s1", "p1", 0, true)).unwrap();
        store.insert_result(&run.id, &result("s1", "p1", 1, false)).unwrap();
        store.insert_result(&run.id, &result("s2", "p1", 0, true)).unwrap();
        store.insert_result(&run.id, &result("s2", "p1", 1, true)).unwrap();

        let plan = plan_resume(&store, &run.id, false).unwrap();
        assert!(!plan.already_complete);
        assert!(!plan.inferred_scope);
        assert_eq!(
            plan.successful[&("p1".into(), "s1".into())],
            BTreeSet::from([0])
        );
        assert_eq!(
            plan.successful[&("p1".into(), "s2".into())],
            BTreeSet::from([0, 1])
        );
    }

    #[test]
    fn succeeded_higher_repetition_does_not_mask_a_failed_lower_one() {
        let (store, run) = seeded_store();
        // s1: rep 0 failed, rep 1 succeeded; s2 fully done
        store.insert_result(&run.id, &result("s1", "p1", 0, false)).unwrap();
        store.insert_result(&run.id, &result("s1", "p1", 1, true)).unwrap();
        store.insert_result(&run.id, &result("s2", "p1", 0, true)).unwrap();
        store.insert_result(&run.id, &result("s2", "p1", 1, true)).unwrap();

        let plan = plan_resume(&store, &run.id, false).unwrap();
        assert!(!plan.already_complete);
        assert_eq!(
            plan.successful[&("p1".into(), "s1".into())],
            BTreeSet::from([1])
        );

        // redoing index 0 completes the run; resume converges to a no-op
        store.insert_result(&run.id, &result("s1", "p1", 0, true)).unwrap();
        let plan = plan_resume(&store, &run.id, false).unwrap();
        assert!(plan.already_complete);
    }

    #[test]
    fn fully_complete_run_resumes_as_noop() {
        let (store, run) = seeded_store();
        for sid in ["s1", "s2"] {
            for rep in 0..2 {
                store.insert_result(&run.id, &result(sid, "p1", rep, true)).unwrap();
            }
        }
        let plan = plan_resume(&store, &run.id, false).unwrap();
        assert!(plan.already_complete);
    }

    #[test]
    fn unknown_run_is_reported() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        assert!(matches!(
            plan_resume(&store, "eval-2026-01-01-deadbeef", false),
            Err(ResumeError::RunNotFound(_))
        ));
    }

    #[test]
    fn live_foreign_owner_blocks_unless_forced() {
        let id = "eval-2026-01-01-cafe0000";
        let live = |_pid: u32| true;
        let dead = |_pid: u32| false;
        assert!(matches!(
            check_owner(id, Some(999), 1, false, live),
            Err(ResumeError::LockHeld { owner_pid: 999, .. })
        ));
        // forced takeover, same process, or a dead owner all pass
        assert!(check_owner(id, Some(999), 1, true, live).is_ok());
        assert!(check_owner(id, Some(1), 1, false, live).is_ok());
        assert!(check_owner(id, Some(999), 1, false, dead).is_ok());
        assert!(check_owner(id, None, 1, false, live).is_ok());
    }

    #[test]
    fn legacy_scope_is_inferred_from_results() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let run = RunRecord {
            id: "eval-2025-01-01-00000001".into(),
            description: "legacy".into(),
            status: RunStatus::Running,
            scenario_count: 0,
            profile_count: 0,
            total_tests: 0,
            scope: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        };
        store.create_run(&run).unwrap();
        store.insert_result(&run.id, &result("s1", "p1", 0, true)).unwrap();
        store.insert_result(&run.id, &result("s1", "p2", 2, false)).unwrap();

        let plan = plan_resume(&store, &run.id, false).unwrap();
        assert!(plan.inferred_scope);
        assert_eq!(plan.scope.repetitions, 3);
        assert_eq!(plan.scope.scenario_ids, vec!["s1"]);
        assert_eq!(plan.scope.profile_names, vec!["p1", "p2"]);
    }

    #[test]
    fn legacy_run_without_results_is_scope_unknown() {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let run = RunRecord {
            id: "eval-2025-01-01-00000002".into(),
            description: "legacy".into(),
            status: RunStatus::Running,
            scenario_count: 0,
            profile_count: 0,
            total_tests: 0,
            scope: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        };
        store.create_run(&run).unwrap();
        assert!(matches!(
            plan_resume(&store, &run.id, false),
            Err(ResumeError::ScopeUnknown(_))
        ));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }
}
