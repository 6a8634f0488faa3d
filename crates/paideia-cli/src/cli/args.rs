use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "paideia",
    version,
    about = "Factorial evaluation harness for AI tutor configurations"
)]
pub struct Cli {
    /// log filter (tracing EnvFilter syntax, e.g. info or paideia_core=debug)
    #[arg(long, global = true, default_value = "warn", env = "PAIDEIA_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample eval.yaml to get started
    Init(InitArgs),
    /// Run the full scenario x profile x repetition matrix
    Run(RunArgs),
    /// Resume an interrupted run without redoing successful work
    Resume(ResumeArgs),
    /// Re-run the judge over a run's stored generations
    Rejudge(RejudgeArgs),
    /// Factorial ANOVA over a run's persisted scores
    Analyze(AnalyzeArgs),
    /// List persisted runs
    Runs(RunsArgs),
}

#[derive(Parser)]
pub struct InitArgs {
    #[arg(long, default_value = "eval.yaml")]
    pub config: PathBuf,
}

#[derive(clap::Args, Clone)]
pub struct ProviderArgs {
    /// tutor provider: fake|openai
    #[arg(long, default_value = "fake")]
    pub tutor: String,

    /// judge provider: fake|openai|none
    #[arg(long, default_value = "fake")]
    pub judge: String,

    /// judge model identifier (live judge only)
    #[arg(long, default_value = "gpt-4o-mini", env = "PAIDEIA_JUDGE_MODEL")]
    pub judge_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint base URL
    #[arg(long, env = "PAIDEIA_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Parser)]
pub struct RunArgs {
    #[arg(long, default_value = "eval.yaml")]
    pub config: PathBuf,
    #[arg(long, default_value = ".paideia/evaluations.db")]
    pub db: PathBuf,

    #[arg(long, default_value = "")]
    pub description: String,

    /// reject configs with unknown keys instead of warning
    #[arg(long)]
    pub strict: bool,

    /// override settings.workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// override settings.repetitions
    #[arg(long)]
    pub repetitions: Option<u32>,

    /// run only these scenario ids (repeatable)
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,

    /// run only these profile names (repeatable)
    #[arg(long = "profile")]
    pub profiles: Vec<String>,

    #[command(flatten)]
    pub providers: ProviderArgs,
}

#[derive(Parser)]
pub struct ResumeArgs {
    pub run_id: String,

    #[arg(long, default_value = "eval.yaml")]
    pub config: PathBuf,
    #[arg(long, default_value = ".paideia/evaluations.db")]
    pub db: PathBuf,

    /// take over a run whose owning process still looks alive
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub strict: bool,

    #[command(flatten)]
    pub providers: ProviderArgs,
}

#[derive(Parser)]
pub struct RejudgeArgs {
    pub run_id: String,

    #[arg(long, default_value = "eval.yaml")]
    pub config: PathBuf,
    #[arg(long, default_value = ".paideia/evaluations.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub strict: bool,

    #[command(flatten)]
    pub providers: ProviderArgs,
}

#[derive(Parser)]
pub struct AnalyzeArgs {
    pub run_id: String,

    #[arg(long, default_value = ".paideia/evaluations.db")]
    pub db: PathBuf,

    /// score column: overall|base|recognition
    #[arg(long, default_value = "overall")]
    pub score: String,

    /// only judgments from judge models matching this substring
    #[arg(long)]
    pub judge_model: Option<String>,

    /// emit the full ANOVA result as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct RunsArgs {
    #[arg(long, default_value = ".paideia/evaluations.db")]
    pub db: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}
