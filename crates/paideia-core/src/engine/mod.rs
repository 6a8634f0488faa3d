pub mod dialogue;
pub mod matrix;
pub mod rejudge;
pub mod retry;
pub mod runstate;
pub mod scheduler;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{EvalConfig, Settings};
use crate::errors::ResumeError;
use crate::events::{EventSink, RunEvent};
use crate::model::{Profile, Scenario, TestSlot};
use crate::providers::judge::JudgeService;
use crate::providers::{DirectiveSynthesizer, TutorClient};
use crate::storage::Store;
use dialogue::DialogueDeps;
use retry::RetryPolicy;
use scheduler::ProgressBoard;

/// What a fresh run should cover. Empty selections mean "everything in the
/// config"; `None` overrides fall back to the config's settings.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub description: String,
    pub scenario_ids: Vec<String>,
    pub profile_names: Vec<String>,
    pub repetitions: Option<u32>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub scheduled: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub resumed: bool,
    pub already_complete: bool,
}

/// Ties the pieces together: matrix -> pool -> dialogue loop -> store, with
/// events emitted along the way. One `Evaluator` drives one run at a time.
pub struct Evaluator {
    pub store: Store,
    pub tutor: Arc<dyn TutorClient>,
    pub judge: JudgeService,
    pub synthesizer: Arc<dyn DirectiveSynthesizer>,
    pub settings: Settings,
    pub sink: Arc<dyn EventSink>,
}

impl Evaluator {
    pub async fn run(&self, cfg: &EvalConfig, req: &RunRequest) -> anyhow::Result<RunOutcome> {
        let scenarios = cfg.select_scenarios(&req.scenario_ids)?;
        let profiles = cfg.select_profiles(&req.profile_names)?;
        let repetitions = req.repetitions.unwrap_or(self.settings.repetitions);
        anyhow::ensure!(repetitions > 0, "repetitions must be at least 1");

        let slots = matrix::build_matrix(&scenarios, &profiles, repetitions)?;
        let overrides = overrides_json(req, &self.settings);
        let run = runstate::create_run(
            &self.store,
            &req.description,
            &scenarios,
            &profiles,
            repetitions,
            overrides,
        )
        .context("failed to persist run record")?;

        self.sink.emit(RunEvent::RunStarted {
            run_id: run.id.clone(),
            total_tests: run.total_tests,
            resumed: false,
        });

        let (succeeded, failed) = self
            .execute(&run.id, slots, scenarios, profiles, req.workers)
            .await;

        runstate::finalize(&self.store, &run.id)?;
        self.sink.emit(RunEvent::RunCompleted {
            run_id: run.id.clone(),
            succeeded,
            failed,
        });

        Ok(RunOutcome {
            run_id: run.id,
            scheduled: succeeded + failed,
            succeeded,
            failed,
            resumed: false,
            already_complete: false,
        })
    }

    /// Resumes an interrupted run. Scope comes from the run record, not the
    /// caller; only unsuccessful (profile, scenario, repetition) work is
    /// rescheduled, so resuming is idempotent.
    pub async fn resume(
        &self,
        cfg: &EvalConfig,
        run_id: &str,
        force: bool,
    ) -> Result<RunOutcome, ResumeError> {
        let plan = runstate::plan_resume(&self.store, run_id, force)?;
        if plan.already_complete {
            return Ok(RunOutcome {
                run_id: run_id.to_string(),
                scheduled: 0,
                succeeded: 0,
                failed: 0,
                resumed: true,
                already_complete: true,
            });
        }

        let scenarios = cfg.select_scenarios(&plan.scope.scenario_ids).map_err(|e| {
            ResumeError::Other(anyhow::anyhow!("run scope does not match config: {e}"))
        })?;
        let profiles = cfg.select_profiles(&plan.scope.profile_names).map_err(|e| {
            ResumeError::Other(anyhow::anyhow!("run scope does not match config: {e}"))
        })?;

        let slots = matrix::build_remaining(
            &scenarios,
            &profiles,
            plan.scope.repetitions,
            |profile, scenario, repetition| {
                plan.successful
                    .get(&(profile.name.clone(), scenario.id.clone()))
                    .is_some_and(|reps| reps.contains(&repetition))
            },
        );

        self.store
            .set_run_owner(run_id, std::process::id())
            .map_err(ResumeError::Other)?;
        self.store
            .mark_run_running(run_id)
            .map_err(ResumeError::Other)?;

        self.sink.emit(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            total_tests: slots.len() as u32,
            resumed: true,
        });

        let scheduled = slots.len() as u32;
        let (succeeded, failed) = self
            .execute(run_id, slots, scenarios, profiles, None)
            .await;

        runstate::finalize(&self.store, run_id).map_err(ResumeError::Other)?;
        self.sink.emit(RunEvent::RunCompleted {
            run_id: run_id.to_string(),
            succeeded,
            failed,
        });

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            scheduled,
            succeeded,
            failed,
            resumed: true,
            already_complete: false,
        })
    }

    async fn execute(
        &self,
        run_id: &str,
        slots: Vec<TestSlot>,
        scenarios: Vec<Scenario>,
        profiles: Vec<Profile>,
        workers_override: Option<usize>,
    ) -> (u32, u32) {
        let mut expected: BTreeMap<String, u32> = BTreeMap::new();
        for slot in &slots {
            *expected
                .entry(scenarios[slot.scenario_idx].id.clone())
                .or_default() += 1;
        }

        let runner = Arc::new(SlotRunner {
            run_id: run_id.to_string(),
            store: self.store.clone(),
            deps: DialogueDeps {
                tutor: self.tutor.clone(),
                judge: self.judge.clone(),
                synthesizer: self.synthesizer.clone(),
                retry: RetryPolicy {
                    max_retries: self.settings.retry.max_retries,
                    base_delay: Duration::from_millis(self.settings.retry.base_delay_ms),
                },
                default_min_score: self.settings.min_score,
                timeout: self.settings.timeout_seconds.map(Duration::from_secs),
            },
            sink: self.sink.clone(),
            scenarios: Arc::new(scenarios),
            profiles: Arc::new(profiles),
            board: ProgressBoard::new(expected),
            succeeded: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        });

        let workers = workers_override.unwrap_or(self.settings.workers);
        let delay = Duration::from_millis(self.settings.call_delay_ms);
        let process_runner = runner.clone();
        scheduler::run_pool(Arc::new(slots), workers, delay, move |slot| {
            let runner = process_runner.clone();
            async move { runner.process(slot).await }
        })
        .await;

        (
            runner.succeeded.load(Ordering::SeqCst),
            runner.failed.load(Ordering::SeqCst),
        )
    }
}

struct SlotRunner {
    run_id: String,
    store: Store,
    deps: DialogueDeps,
    sink: Arc<dyn EventSink>,
    scenarios: Arc<Vec<Scenario>>,
    profiles: Arc<Vec<Profile>>,
    board: ProgressBoard,
    succeeded: AtomicU32,
    failed: AtomicU32,
}

impl SlotRunner {
    async fn process(&self, slot: TestSlot) {
        let scenario = &self.scenarios[slot.scenario_idx];
        let profile = &self.profiles[slot.profile_idx];

        self.sink.emit(RunEvent::TestStarted {
            scenario_id: scenario.id.clone(),
            profile_name: profile.name.clone(),
            repetition: slot.repetition,
        });

        let row = dialogue::run_slot(&self.deps, scenario, profile, slot.repetition).await;

        if let Err(e) = self.store.insert_result(&self.run_id, &row) {
            // storage failure still advances the progress counter; the slot
            // was claimed and will be retried on resume
            tracing::error!(
                run_id = %self.run_id,
                scenario = %scenario.id,
                error = %e,
                "failed to persist result"
            );
        }

        if row.success {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            self.sink.emit(RunEvent::TestCompleted {
                scenario_id: scenario.id.clone(),
                profile_name: profile.name.clone(),
                repetition: slot.repetition,
                score: row.overall_score,
                latency_ms: row.latency_ms,
            });
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
            self.sink.emit(RunEvent::TestErrored {
                scenario_id: scenario.id.clone(),
                profile_name: profile.name.clone(),
                repetition: slot.repetition,
                error: row.error.clone().unwrap_or_else(|| "unknown error".into()),
            });
        }

        if let Some((done, total)) = self.board.advance(&scenario.id) {
            self.sink.emit(RunEvent::ScenarioCompleted {
                scenario_id: scenario.id.clone(),
                done,
                total,
            });
        }
    }
}

fn overrides_json(req: &RunRequest, settings: &Settings) -> serde_json::Value {
    serde_json::json!({
        "workers": req.workers.unwrap_or(settings.workers),
        "call_delay_ms": settings.call_delay_ms,
        "scenario_filter": req.scenario_ids,
        "profile_filter": req.profile_names,
    })
}
