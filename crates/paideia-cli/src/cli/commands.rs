use std::path::Path;
use std::sync::Arc;

use super::args::*;
use super::render;
use paideia_core::config::{load_config, write_sample_config, EvalConfig};
use paideia_core::engine::rejudge::rejudge_run;
use paideia_core::engine::{Evaluator, RunRequest};
use paideia_core::errors::ResumeError;
use paideia_core::providers::fake::{FakeJudgeClient, FakeTutorClient};
use paideia_core::providers::http::{HttpJudgeClient, HttpTutorClient};
use paideia_core::providers::judge::JudgeService;
use paideia_core::providers::{NoopSynthesizer, TutorClient};
use paideia_core::storage::{ResultFilter, ScoreColumn, Store};
use paideia_stats::AnovaError;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const EVAL_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args).await,
        Command::Resume(args) => cmd_resume(args).await,
        Command::Rejudge(args) => cmd_rejudge(args).await,
        Command::Analyze(args) => cmd_analyze(args),
        Command::Runs(args) => cmd_runs(args),
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    if let Some(parent) = args.config.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let store = open_store(&args.db)?;
    let evaluator = match build_evaluator(&cfg, store.clone(), &args.providers) {
        Ok(ev) => ev,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let req = RunRequest {
        description: args.description,
        scenario_ids: args.scenarios,
        profile_names: args.profiles,
        repetitions: args.repetitions,
        workers: args.workers,
    };
    let outcome = evaluator.run(&cfg, &req).await?;

    let stats = store.run_stats(&outcome.run_id, &ResultFilter::default())?;
    render::print_run_stats(&outcome.run_id, &stats);

    Ok(if outcome.failed > 0 {
        exit_codes::EVAL_FAILED
    } else {
        exit_codes::OK
    })
}

async fn cmd_resume(args: ResumeArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let store = open_store(&args.db)?;
    let evaluator = match build_evaluator(&cfg, store.clone(), &args.providers) {
        Ok(ev) => ev,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    match evaluator.resume(&cfg, &args.run_id, args.force).await {
        Ok(outcome) if outcome.already_complete => {
            println!("run {} is already complete, nothing to resume", args.run_id);
            Ok(exit_codes::OK)
        }
        Ok(outcome) => {
            let stats = store.run_stats(&outcome.run_id, &ResultFilter::default())?;
            render::print_run_stats(&outcome.run_id, &stats);
            Ok(if outcome.failed > 0 {
                exit_codes::EVAL_FAILED
            } else {
                exit_codes::OK
            })
        }
        Err(e @ ResumeError::LockHeld { .. }) => {
            eprintln!("{e}");
            Ok(exit_codes::EVAL_FAILED)
        }
        Err(e @ (ResumeError::RunNotFound(_) | ResumeError::ScopeUnknown(_))) => {
            eprintln!("{e}");
            Ok(exit_codes::CONFIG_ERROR)
        }
        Err(ResumeError::Other(e)) => Err(e),
    }
}

async fn cmd_rejudge(args: RejudgeArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let store = open_store(&args.db)?;
    if store.get_run(&args.run_id)?.is_none() {
        eprintln!("run not found: {}", args.run_id);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let judge = match build_judge(&cfg, &args.providers) {
        Ok(judge) if judge.is_enabled() => judge,
        Ok(_) => {
            eprintln!("config error: rejudge requires a judge provider (fake|openai)");
            return Ok(exit_codes::CONFIG_ERROR);
        }
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let summary = rejudge_run(&store, &judge, &cfg, &args.run_id, &ResultFilter::default()).await?;
    println!(
        "run {}: {} examined, {} rejudged, {} skipped",
        args.run_id, summary.examined, summary.rejudged, summary.skipped
    );
    Ok(exit_codes::OK)
}

fn cmd_analyze(args: AnalyzeArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    if store.get_run(&args.run_id)?.is_none() {
        eprintln!("run not found: {}", args.run_id);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let Some(score) = ScoreColumn::parse(&args.score) else {
        eprintln!(
            "config error: unknown score column '{}' (overall|base|recognition)",
            args.score
        );
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let filter = ResultFilter {
        judge_model: args.judge_model.clone(),
        ..Default::default()
    };
    let cells = store.factorial_cells(&args.run_id, score, &filter)?;

    match paideia_stats::run_anova(&cells) {
        Ok(anova) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&anova)?);
            } else {
                let cell_stats = paideia_stats::describe::cell_summaries(&cells);
                render::print_anova(&args.score, &anova, &cell_stats);
            }
            Ok(exit_codes::OK)
        }
        Err(AnovaError::NoSamples) => {
            // a structured outcome, not a crash: there is just nothing to
            // analyze for this score column
            println!(
                "no scored results for '{}' in run {}",
                args.score, args.run_id
            );
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_runs(args: RunsArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let runs = store.list_runs(args.limit)?;
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(exit_codes::OK);
    }
    println!(
        "{:<28} {:<10} {:>6} {:>9} {:>9}  started",
        "run", "status", "tests", "scenarios", "profiles"
    );
    for run in runs {
        println!(
            "{:<28} {:<10} {:>6} {:>9} {:>9}  {}",
            run.id,
            run.status.as_str(),
            run.total_tests,
            run.scenario_count,
            run.profile_count,
            run.started_at
        );
    }
    Ok(exit_codes::OK)
}

fn open_store(db: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

fn build_evaluator(
    cfg: &EvalConfig,
    store: Store,
    providers: &ProviderArgs,
) -> anyhow::Result<Evaluator> {
    let tutor: Arc<dyn TutorClient> = match providers.tutor.as_str() {
        "fake" => Arc::new(FakeTutorClient),
        "openai" => {
            let api_key = require_api_key(providers)?;
            Arc::new(match &providers.base_url {
                Some(url) => HttpTutorClient::with_base_url(url.clone(), api_key),
                None => HttpTutorClient::new(api_key),
            })
        }
        other => anyhow::bail!("unknown tutor provider '{other}' (fake|openai)"),
    };

    let judge = build_judge(cfg, providers)?;

    Ok(Evaluator {
        store,
        tutor,
        judge,
        synthesizer: Arc::new(NoopSynthesizer),
        settings: cfg.settings.clone(),
        sink: Arc::new(render::ConsoleSink),
    })
}

fn build_judge(cfg: &EvalConfig, providers: &ProviderArgs) -> anyhow::Result<JudgeService> {
    Ok(match providers.judge.as_str() {
        "none" => JudgeService::disabled(cfg.rubric.clone()),
        "fake" => JudgeService::new(Arc::new(FakeJudgeClient), cfg.rubric.clone()),
        "openai" => {
            let api_key = require_api_key(providers)?;
            let mut client = HttpJudgeClient::new(api_key, providers.judge_model.clone());
            if let Some(url) = &providers.base_url {
                client.base_url = url.clone();
            }
            JudgeService::new(Arc::new(client), cfg.rubric.clone())
        }
        other => anyhow::bail!("unknown judge provider '{other}' (fake|openai|none)"),
    })
}

fn require_api_key(providers: &ProviderArgs) -> anyhow::Result<String> {
    providers
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--api-key (or OPENAI_API_KEY) required for live providers"))
}
