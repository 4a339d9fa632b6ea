use chrono::Utc;
use std::env;
use std::io::{self, BufRead, Write};
use std::process::exit;

use jobflow::config::Config;
use jobflow::jobs::{Job, JobState, NewJob, SettingKey};
use jobflow::{db, telemetry, Queue, QueueError};

const USAGE: &str = "jobflowctl <command>\n\
Commands:\n\
- enqueue '<json>'            e.g. '{\"id\":\"job1\",\"command\":\"echo hi\",\"max_retries\":3}'\n\
- list [--state S] [--limit N]\n\
- status [--json]\n\
- dlq list [--limit N]\n\
- dlq retry <job_id>\n\
- delete <job_id>\n\
- config get [key]\n\
- config set <key> <value>     keys: max-retries, backoff-base\n\
- cleanup [--force]           delete ALL jobs, workers and settings\n\
\n\
Uses JOBFLOW_DATABASE_URL (default ~/.jobflow/jobflow.db).\n\
Workers are started with the `worker` binary.\n";

const DEFAULT_LIST_LIMIT: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        eprint!("{USAGE}");
        exit(2);
    }

    let cfg = Config::from_env()?;
    telemetry::init(cfg.log_json);

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }
    let queue = Queue::new(pool);

    let rest = &args[1..];
    match args[0].as_str() {
        "enqueue" => enqueue(&queue, rest).await?,
        "list" => list(&queue, rest).await?,
        "status" => status(&queue, rest).await?,
        "dlq" => match rest.first().map(String::as_str) {
            Some("list") => dlq_list(&queue, &rest[1..]).await?,
            Some("retry") => dlq_retry(&queue, &rest[1..]).await?,
            _ => usage_error("usage: jobflowctl dlq <list|retry>"),
        },
        "delete" => delete(&queue, rest).await?,
        "config" => match rest.first().map(String::as_str) {
            Some("get") => config_get(&queue, &rest[1..]).await?,
            Some("set") => config_set(&queue, &rest[1..]).await?,
            _ => usage_error("usage: jobflowctl config <get|set>"),
        },
        "cleanup" => cleanup(&queue, rest).await?,
        "help" | "--help" | "-h" => print!("{USAGE}"),
        other => usage_error(&format!("Unknown command: {other}")),
    }

    Ok(())
}

fn usage_error(msg: &str) -> ! {
    eprintln!("{msg}");
    exit(2);
}

fn user_error(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    exit(1);
}

/// Value following `--name` / `-n`, if present.
fn flag_value<'a>(args: &'a [String], long: &str, short: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == long || a == short)
        .map(|i| match args.get(i + 1) {
            Some(v) => v.as_str(),
            None => usage_error(&format!("{long} needs a value")),
        })
}

fn limit_arg(args: &[String]) -> usize {
    match flag_value(args, "--limit", "-l") {
        Some(v) => v
            .parse()
            .unwrap_or_else(|_| usage_error(&format!("invalid --limit '{v}'"))),
        None => DEFAULT_LIST_LIMIT,
    }
}

async fn enqueue(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let Some(raw) = args.first() else {
        usage_error("usage: jobflowctl enqueue '<json>'");
    };

    let job: NewJob = match serde_json::from_str(raw) {
        Ok(job) => job,
        Err(e) => user_error(format!("Invalid JSON - {e} (job must have 'id' and 'command')")),
    };
    let id = job.id.clone();

    match queue.enqueue(job).await {
        Ok(true) => {}
        Ok(false) => user_error(format!("Job '{id}' already exists")),
        Err(QueueError::InvalidArgument(msg)) => user_error(msg),
        Err(e) => return Err(e.into()),
    }

    // Re-read so the output shows the resolved retry budget.
    if let Some(stored) = queue.get_job(&id).await? {
        println!("Job '{}' enqueued", stored.id);
        println!("  Command: {}", stored.command);
        println!("  Max retries: {}", stored.max_retries);
    }
    Ok(())
}

async fn list(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let state = match flag_value(args, "--state", "-s") {
        Some(s) => Some(s.parse::<JobState>().unwrap_or_else(|e| user_error(e))),
        None => None,
    };
    let limit = limit_arg(args);

    let jobs = queue.list_jobs(state).await?;
    if jobs.is_empty() {
        match state {
            Some(s) => println!("No jobs found with state '{s}'"),
            None => println!("No jobs found"),
        }
        return Ok(());
    }

    let title = match state {
        Some(s) => format!("=== Jobs ({}) ===", s.as_str().to_uppercase()),
        None => "=== Jobs ===".to_string(),
    };
    print_jobs(&title, &jobs, limit);
    Ok(())
}

async fn status(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let report = queue.status(Utc::now()).await?;

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Queue Status ===\n");
    println!("Jobs by State:");
    let rows: Vec<Vec<String>> = report
        .jobs
        .iter()
        .map(|(state, count)| vec![state.as_str().to_uppercase(), count.to_string()])
        .collect();
    print_table(&["State", "Count"], &rows);

    println!("\nActive Workers: {}", report.workers.len());
    if !report.workers.is_empty() {
        let rows: Vec<Vec<String>> = report
            .workers
            .iter()
            .map(|w| {
                vec![
                    w.worker_id.clone(),
                    w.started_at.format("%H:%M:%S").to_string(),
                    w.last_heartbeat.format("%H:%M:%S").to_string(),
                    w.status.clone(),
                ]
            })
            .collect();
        print_table(&["Worker ID", "Started At", "Last Heartbeat", "Status"], &rows);
    }

    println!("\nConfiguration:");
    print_table(
        &["Setting", "Value"],
        &[
            vec!["Max Retries".into(), report.config.max_retries.to_string()],
            vec!["Backoff Base".into(), report.config.backoff_base.to_string()],
        ],
    );
    println!();
    Ok(())
}

async fn dlq_list(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let limit = limit_arg(args);
    let jobs = queue.list_dlq_jobs().await?;
    if jobs.is_empty() {
        println!("Dead Letter Queue is empty");
        return Ok(());
    }
    print_jobs("=== Dead Letter Queue ===", &jobs, limit);
    Ok(())
}

async fn dlq_retry(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let Some(id) = args.first() else {
        usage_error("usage: jobflowctl dlq retry <job_id>");
    };

    // The repo call distinguishes the two refusal reasons for the message.
    match queue.jobs().retry_dead(id, Utc::now()).await {
        Ok(_) => println!("Job '{id}' moved back to queue for retry"),
        Err(QueueError::NotFound(_)) => user_error(format!("Job '{id}' not found")),
        Err(QueueError::InvalidState { state, .. }) => user_error(format!(
            "Job '{id}' is not in DLQ (current state: {state})"
        )),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn delete(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let Some(id) = args.first() else {
        usage_error("usage: jobflowctl delete <job_id>");
    };
    if queue.delete_job(id).await? {
        println!("Job '{id}' deleted");
    } else {
        user_error(format!("Job '{id}' not found"));
    }
    Ok(())
}

async fn config_get(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    match args.first() {
        Some(key) => {
            let key = SettingKey::parse(key).unwrap_or_else(|e| user_error(e));
            let value = queue.settings().get(key).await?;
            println!("{}: {value}", key.as_str());
        }
        None => {
            let settings = queue.settings().snapshot().await?;
            println!("\n=== Configuration ===\n");
            println!("max_retries: {}", settings.max_retries);
            println!("backoff_base: {}", settings.backoff_base);
        }
    }
    Ok(())
}

async fn config_set(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let (Some(key), Some(value)) = (args.first(), args.get(1)) else {
        usage_error("usage: jobflowctl config set <key> <value>");
    };
    let key = SettingKey::parse(key).unwrap_or_else(|e| user_error(e));

    match queue.settings().set(key, value).await {
        Ok(v) => println!("Set {} to {v}", key.as_str()),
        Err(QueueError::InvalidArgument(msg)) => user_error(msg),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cleanup(queue: &Queue, args: &[String]) -> anyhow::Result<()> {
    let force = args.iter().any(|a| a == "--force" || a == "-f");
    if !force && !confirm("This will delete ALL jobs and reset the database. Continue?")? {
        eprintln!("Aborted!");
        exit(1);
    }

    let report = queue.cleanup().await?;
    println!("Database cleaned up");
    println!("  Jobs removed: {}", report.jobs);
    println!("  Worker records removed: {}", report.workers);
    println!("  Settings reset: {}", report.settings);
    Ok(())
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// ----------------------------
// Rendering
// ----------------------------

fn print_jobs(title: &str, jobs: &[Job], limit: usize) {
    let shown = &jobs[..jobs.len().min(limit)];
    let rows: Vec<Vec<String>> = shown.iter().map(job_row).collect();

    println!("\n{title}\n");
    print_table(
        &["ID", "Command", "State", "Attempts", "Created", "Error"],
        &rows,
    );
    if jobs.len() > shown.len() {
        println!("\nShowing first {limit} of {} jobs. Use --limit to see more.", jobs.len());
    }
}

fn job_row(job: &Job) -> Vec<String> {
    vec![
        truncate(&job.id, 20),
        truncate(&job.command, 40),
        job.state.to_string(),
        format!("{}/{}", job.attempts, job.max_retries),
        job.created_at.format("%Y-%m-%d").to_string(),
        job.error_message
            .as_deref()
            .map(|e| truncate(e, 30))
            .unwrap_or_default(),
    ]
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}", w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.to_vec()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in rows {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
}
