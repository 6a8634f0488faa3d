use paideia_core::events::{EventSink, RunEvent};
use paideia_core::model::FactorKey;
use paideia_core::storage::RunStats;
use paideia_stats::describe::Summary;
use paideia_stats::FactorialAnova;

/// Renders run events as console lines. All rendering lives here; the
/// engine only emits structured records.
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id,
                total_tests,
                resumed,
            } => {
                if resumed {
                    eprintln!("resuming {run_id}: {total_tests} test(s) remaining");
                } else {
                    eprintln!("run {run_id}: {total_tests} test(s) scheduled");
                }
            }
            RunEvent::TestStarted { .. } => {}
            RunEvent::TestCompleted {
                scenario_id,
                profile_name,
                repetition,
                score,
                latency_ms,
            } => {
                let score = score
                    .map(|s| format!("{s:.1}"))
                    .unwrap_or_else(|| "-".into());
                let latency = latency_ms
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_else(|| "-".into());
                eprintln!("  ok {scenario_id} / {profile_name} #{repetition}  score={score}  {latency}");
            }
            RunEvent::TestErrored {
                scenario_id,
                profile_name,
                repetition,
                error,
            } => {
                eprintln!("  FAIL {scenario_id} / {profile_name} #{repetition}  {error}");
            }
            RunEvent::ScenarioCompleted {
                scenario_id,
                done,
                total,
            } => {
                eprintln!("scenario {scenario_id} complete ({done}/{total})");
            }
            RunEvent::RunCompleted {
                run_id,
                succeeded,
                failed,
            } => {
                eprintln!("run {run_id} finished: {succeeded} succeeded, {failed} failed");
            }
        }
    }
}

pub fn print_run_stats(run_id: &str, stats: &RunStats) {
    println!("run {run_id}");
    println!(
        "  tests: {} total, {} succeeded, {} failed, {} scored",
        stats.total, stats.succeeded, stats.failed, stats.scored
    );
    if let Some(mean) = stats.mean_overall {
        println!("  mean overall score: {mean:.1}");
    }
    if let Some(mean) = stats.mean_base {
        println!("  mean base score: {mean:.1}");
    }
    if let Some(mean) = stats.mean_recognition {
        println!("  mean recognition score: {mean:.1}");
    }
    if let Some(ms) = stats.mean_latency_ms {
        println!("  mean latency: {ms:.0}ms");
    }
}

pub fn print_anova(
    score_label: &str,
    anova: &FactorialAnova,
    cell_stats: &[(FactorKey, Summary)],
) {
    println!(
        "factorial ANOVA ({score_label}): N = {}, grand mean = {:.2}",
        anova.n, anova.grand_mean
    );
    if !anova.balanced {
        println!("  note: unbalanced cell sizes, three-way term is approximate");
    }

    println!("\n  marginal means");
    for m in &anova.marginals {
        println!(
            "    {:<22} off: {:>7.2} (n={:<3})  on: {:>7.2} (n={:<3})  delta: {:+.2}",
            m.factor.label(),
            m.mean0,
            m.n0,
            m.mean1,
            m.n1,
            m.mean1 - m.mean0
        );
    }

    println!("\n  cells");
    for (key, s) in cell_stats {
        println!(
            "    {}  n={:<3} mean={:>7.2} sd={:>6.2} range={:.1}..{:.1}",
            key.label(),
            s.n,
            s.mean,
            s.sd,
            s.min,
            s.max
        );
    }

    println!(
        "\n  {:<30} {:>10} {:>4} {:>10} {:>8} {:>8} {:>7}",
        "term", "SS", "df", "MS", "F", "p", "eta^2"
    );
    for row in &anova.effects {
        let marker = if row.significant_05() {
            " *"
        } else if row.significant_10() {
            " ."
        } else {
            ""
        };
        println!(
            "  {:<30} {:>10.2} {:>4.0} {:>10.2} {:>8.2} {:>8.4} {:>7.3}{}",
            row.label, row.ss, row.df, row.ms, row.f, row.p, row.eta_sq, marker
        );
    }
    println!(
        "  {:<30} {:>10.2} {:>4.0} {:>10.2}",
        "error", anova.ss_error, anova.df_error, anova.ms_error
    );
    println!(
        "  {:<30} {:>10.2} {:>4.0}",
        "total", anova.ss_total, anova.df_total
    );
    println!("\n  significance: * p<0.05, . p<0.10");
}
