//! jobq CLI: operator console for the task dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobq::catalog::CATALOG;
use jobq::config::Config;
use jobq::engine::{CheckinHandler, Dispatcher, FileStore};
use jobq::envelope::Message;
use jobq::fleet::{Fleet, WorkerDirectory};
use jobq::model::WorkerId;
use jobq::notify::Notifier;
use jobq::telemetry::{TelemetryConfig, init_telemetry};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "jobq", about = "Task dispatch for remote workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the task kinds operators can queue
    Kinds,
    /// Interactive console over a fleet loaded from a seed file
    Console {
        /// TOML file of [[worker]] entries
        #[arg(long)]
        fleet: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Kinds => {
            cmd_kinds();
            Ok(())
        }
        Command::Console { fleet } => cmd_console(fleet).await,
    }
}

fn cmd_kinds() {
    println!(
        "{:<14}  {:<13}  {:<4}  {:<40}  SUMMARY",
        "NAME", "KIND", "CODE", "USAGE"
    );
    println!("{}", "-".repeat(110));
    for spec in CATALOG {
        println!(
            "{:<14}  {:<13}  {:<4}  {:<40}  {}",
            spec.name,
            spec.kind,
            spec.kind.code(),
            spec.usage(),
            spec.summary
        );
    }
    println!("\n{} kind(s)", CATALOG.len());
}

async fn cmd_console(fleet_file: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let fleet = Arc::new(
        Fleet::load_from_file(&fleet_file)
            .with_context(|| format!("loading fleet from {}", fleet_file.display()))?,
    );
    let notifier = Notifier::new();
    let dispatcher = Arc::new(Dispatcher::new(
        fleet.clone(),
        notifier.clone(),
        config.queue_capacity,
    ));
    let handler = CheckinHandler::new(dispatcher.clone(), FileStore::new(&config.storage_root))
        .with_max_padding(config.max_padding);

    let mut messages = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            println!("{message}");
        }
    });

    println!(
        "{} worker(s) loaded, downloads go to {}. Type `help` for commands.",
        fleet.len(),
        handler.files().root().display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = words.split_first() else {
            continue;
        };

        let outcome = match command {
            "help" => {
                print_help();
                Ok(())
            }
            "workers" => {
                print_workers(&fleet);
                Ok(())
            }
            "add" => cmd_add(&dispatcher, rest),
            "clear" => cmd_clear(&dispatcher, rest),
            "jobs" => cmd_jobs(&dispatcher, rest),
            "checkin" => cmd_checkin(&handler, rest).await,
            "quit" | "exit" => break,
            other => Err(anyhow::anyhow!("unknown command: {other}")),
        };
        if let Err(e) = outcome {
            notifier.error(format!("{e:#}"));
        }
    }
    Ok(())
}

fn print_help() {
    println!("workers                          list known workers");
    println!("add <worker|all> <kind> [args]   queue a task (see `jobq kinds`)");
    println!("clear <worker>                   cancel pending tasks");
    println!("jobs <worker>                    show unfinished tasks");
    println!("checkin <worker>                 simulate an idle checkin");
    println!("quit                             leave the console");
}

fn print_workers(fleet: &Fleet) {
    let now = Utc::now();
    println!("{:<36}  {:<16}  {:<8}  STATUS", "ID", "HOST", "PLATFORM");
    for id in fleet.worker_ids() {
        let info = fleet.info(id).unwrap_or_default();
        let status = fleet
            .status(id, now)
            .map(|s| s.to_string())
            .unwrap_or_else(|e| format!("? ({e})"));
        println!(
            "{:<36}  {:<16}  {:<8}  {}",
            id, info.sys_info.host_name, info.sys_info.platform, status
        );
    }
}

fn parse_worker(raw: Option<&&str>) -> anyhow::Result<WorkerId> {
    match raw {
        None => anyhow::bail!("missing worker ID"),
        Some(&"all") => Ok(WorkerId::BROADCAST),
        Some(s) => s
            .parse()
            .with_context(|| format!("{s:?} is not a worker ID")),
    }
}

fn cmd_add(dispatcher: &Dispatcher, rest: &[&str]) -> anyhow::Result<()> {
    let worker = parse_worker(rest.first())?;
    let kind = rest
        .get(1)
        .ok_or_else(|| anyhow::anyhow!("missing task kind"))?;
    let id = dispatcher.add(worker, kind, &rest[2..])?;
    println!("queued {id}");
    Ok(())
}

fn cmd_clear(dispatcher: &Dispatcher, rest: &[&str]) -> anyhow::Result<()> {
    let worker = parse_worker(rest.first())?;
    let count = dispatcher.clear(worker)?;
    println!("{count} task(s) canceled");
    Ok(())
}

fn cmd_jobs(dispatcher: &Dispatcher, rest: &[&str]) -> anyhow::Result<()> {
    let worker = parse_worker(rest.first())?;
    let rows = dispatcher.active_table(worker)?;
    if rows.is_empty() {
        println!("No unfinished tasks.");
        return Ok(());
    }

    println!(
        "{:<10}  {:<8}  {:<12}  {:<25}  SENT",
        "ID", "STATUS", "TYPE", "CREATED"
    );
    println!("{}", "-".repeat(90));
    for row in &rows {
        let [id, status, kind, created, sent] = row.cells();
        println!("{id:<10}  {status:<8}  {kind:<12}  {created:<25}  {sent}");
    }
    println!("\n{} task(s)", rows.len());
    Ok(())
}

async fn cmd_checkin(handler: &CheckinHandler, rest: &[&str]) -> anyhow::Result<()> {
    let worker = parse_worker(rest.first())?;
    let reply = handler.idle(worker).await?;
    if let Message::Tasks(tasks) = &reply.message {
        println!("{} task(s) delivered", tasks.len());
    }
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
