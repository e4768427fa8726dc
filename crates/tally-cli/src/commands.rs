use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tally_engine::{Engine, EngineConfig, Timestamp};
use tally_intake::{IntakeQueue, QueueConfig};
use tally_types::{ManualClock, VoteIntakeEvent};
use tracing::{debug, info};

use crate::cli::*;
use crate::script::{self, Outcome};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, cli.format),
        Command::Queue(args) => match args.action {
            QueueAction::Inspect { wal } => cmd_queue_inspect(&wal, cli.format),
            QueueAction::Compact { wal } => cmd_queue_compact(&wal),
        },
        Command::Config(args) => cmd_config(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    let steps = script::parse(&text)?;

    let start = args
        .start_ms
        .map(Timestamp::from_millis)
        .unwrap_or_else(Timestamp::now);
    let clock = Arc::new(ManualClock::new(start));
    info!(script = %args.script.display(), steps = steps.len(), start = %start, "running simulation");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let (outcomes, stats) = runtime.block_on(async {
        let engine = Engine::builder(config)
            .clock(clock.clone())
            .build()
            .context("building engine")?;
        let outcomes = script::run(&engine, &clock, &steps).await?;
        let stats = engine.shutdown().await.context("final commit")?;
        anyhow::Ok((outcomes, stats))
    })?;

    match format {
        OutputFormat::Json => {
            for outcome in &outcomes {
                println!("{}", serde_json::to_string(outcome)?);
            }
        }
        OutputFormat::Text => {
            for outcome in &outcomes {
                print_outcome(outcome);
            }
            println!(
                "\n{} {} steps, {} rows committed, {} stale, {} failed batches",
                "✓".green().bold(),
                outcomes.len(),
                stats.committed_rows.to_string().bold(),
                stats.stale_rows,
                stats.failures,
            );
        }
    }
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Created { post } => println!("{} post {}", "created".green(), post.to_string().yellow()),
        Outcome::Accepted { post, user, direction, delta, score } => println!(
            "{} {} on {} by {}  delta {:+}  score {}",
            "accepted".green(),
            direction,
            post.to_string().yellow(),
            user,
            delta,
            score.to_string().bold(),
        ),
        Outcome::Rejected { post, user, reason } => println!(
            "{} vote on {} by {}: {}",
            "rejected".red(),
            post.to_string().yellow(),
            user,
            reason,
        ),
        Outcome::Listed { total, ids } => {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            println!("{} [{}] of {}", "listed".cyan(), ids.join(", "), total);
        }
        Outcome::Counted { post, votes, score } => println!(
            "{} {}  votes {}  score {}",
            "post".cyan(),
            post.to_string().yellow(),
            votes,
            score.to_string().bold(),
        ),
        Outcome::Status { post, user, direction, durable, acknowledged } => {
            let durable = durable.map_or_else(|| "-".to_string(), |d| d.to_string());
            let ack = if *acknowledged { "acked".green() } else { "pending".yellow() };
            println!(
                "{} {} by {}: ledger {}  stored {}  {}",
                "status".cyan(),
                post.to_string().yellow(),
                user,
                direction,
                durable,
                ack,
            );
        }
        Outcome::Advanced { now } => println!("{} clock to {}", "advanced".dimmed(), now),
        Outcome::Flushed { handled } => println!("{} {} events", "flushed".green(), handled),
    }
}

fn cmd_queue_inspect(wal: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let pending = IntakeQueue::inspect(wal).with_context(|| format!("reading {}", wal.display()))?;

    for delivery in &pending {
        let event = VoteIntakeEvent::decode(&delivery.payload);
        match (format, event) {
            (OutputFormat::Json, Ok(event)) => {
                println!("{}", serde_json::json!({ "seq": delivery.seq, "event": event }));
            }
            (OutputFormat::Json, Err(e)) => println!(
                "{}",
                serde_json::json!({
                    "seq": delivery.seq,
                    "error": e.to_string(),
                    "payload": String::from_utf8_lossy(&delivery.payload),
                })
            ),
            (OutputFormat::Text, Ok(event)) => println!(
                "{:>8}  post {}  user {}  {}  {}",
                delivery.seq.to_string().yellow(),
                event.post_id,
                event.user_id,
                event.direction,
                event.submitted_at.to_string().dimmed(),
            ),
            (OutputFormat::Text, Err(e)) => println!(
                "{:>8}  {} {}",
                delivery.seq.to_string().yellow(),
                "malformed:".red(),
                e,
            ),
        }
    }

    if format == OutputFormat::Text {
        println!("{} pending events", pending.len().to_string().bold());
    }
    Ok(())
}

fn cmd_queue_compact(wal: &Path) -> anyhow::Result<()> {
    debug!(wal = %wal.display(), "compacting intake log");
    let before = std::fs::metadata(wal)
        .with_context(|| format!("reading {}", wal.display()))?
        .len();

    let queue = IntakeQueue::open(&QueueConfig {
        capacity: usize::MAX,
        wal_path: Some(wal.to_path_buf()),
        sync_every_write: true,
    })
    .with_context(|| format!("opening {}", wal.display()))?;
    let kept = queue.compact().context("compacting")?;
    let after = std::fs::metadata(wal)?.len();

    println!(
        "{} Compacted {}: kept {} events, {} → {} bytes",
        "✓".green().bold(),
        wal.display(),
        kept.to_string().bold(),
        before,
        after,
    );
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.path.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
