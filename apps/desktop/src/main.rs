use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{api, load_settings, AppContext};
use matching::{calculate_job_match_score, DEFAULT_FUZZY_THRESHOLD};
use serde_json::Value;
use shared::{
    domain::ParsedCv,
    protocol::{CustomizeCvRequest, JobSearchRequest},
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, WatchStream},
    StreamExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Job search and application client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score CV skills against job skills offline.
    Score {
        #[arg(long, value_delimiter = ',', required = true)]
        cv: Vec<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        job: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_FUZZY_THRESHOLD)]
        threshold: f64,
    },
    /// Search jobs, optionally ranking them against CV skills.
    Search {
        text: String,
        #[arg(long)]
        area: Option<String>,
        #[arg(long, value_delimiter = ',')]
        cv: Vec<String>,
    },
    Upload {
        path: PathBuf,
    },
    /// Tailor a parsed CV (JSON file) to a job description (text file).
    Customize {
        #[arg(long)]
        cv: PathBuf,
        #[arg(long)]
        job: PathBuf,
        #[arg(long)]
        model: Option<String>,
    },
    AuthStatus,
    /// Follow pushed jobs and notifications until Ctrl-C.
    Feed {
        /// Subscription filters as a JSON object.
        #[arg(long)]
        filters: Option<String>,
        #[arg(long, value_delimiter = ',')]
        cv: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    if let Command::Score { cv, job, threshold } = &args.command {
        let score = calculate_job_match_score(cv, job, *threshold)?;
        println!("{}", serde_json::to_string_pretty(&score)?);
        return Ok(());
    }

    let settings = load_settings()?;
    let ctx = AppContext::new(settings).context("invalid client settings")?;

    match args.command {
        Command::Score { .. } => {}
        Command::Search { text, area, cv } => search(&ctx, text, area, &cv).await?,
        Command::Upload { path } => upload(&ctx, &path).await?,
        Command::Customize { cv, job, model } => customize(&ctx, &cv, &job, model).await?,
        Command::AuthStatus => {
            let signed_in = api::refresh_session(ctx.http(), ctx.session()).await?;
            match ctx.session().state().user {
                Some(user) if signed_in => {
                    let label = user.email.or(user.name).unwrap_or(user.id.0);
                    println!("signed in as {label}");
                }
                _ => println!("not signed in"),
            }
        }
        Command::Feed { filters, cv } => feed(&ctx, filters.as_deref(), &cv).await?,
    }
    Ok(())
}

async fn search(ctx: &AppContext, text: String, area: Option<String>, cv: &[String]) -> Result<()> {
    let response = api::search_jobs(
        ctx.http(),
        &JobSearchRequest {
            text,
            area,
            ..JobSearchRequest::default()
        },
    )
    .await?;
    if let Some(error) = response.error.filter(|_| !response.success) {
        warn!(%error, "search reported failure");
    }

    let mut rows: Vec<(Option<u8>, &shared::domain::JobItem)> = response
        .jobs
        .iter()
        .map(|job| {
            let percentage = (!cv.is_empty()).then(|| ctx.match_score(cv, job).percentage);
            (percentage, job)
        })
        .collect();
    if !cv.is_empty() {
        rows.sort_by(|a, b| b.0.cmp(&a.0));
    }
    for (percentage, job) in rows {
        match percentage {
            Some(percentage) => println!("{percentage:>3}%  {} @ {}", job.title, job.company),
            None => println!("{} @ {}", job.title, job.company),
        }
    }
    Ok(())
}

fn guess_content_type(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "doc" => Some("application/msword"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

async fn upload(ctx: &AppContext, path: &Path) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("cv");
    let response = api::upload_cv(ctx.http(), file_name, guess_content_type(path), data).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn customize(ctx: &AppContext, cv: &Path, job: &Path, model: Option<String>) -> Result<()> {
    let raw = tokio::fs::read_to_string(cv)
        .await
        .with_context(|| format!("failed to read '{}'", cv.display()))?;
    let cv: ParsedCv = serde_json::from_str(&raw).context("CV file is not a parsed CV")?;
    let job_description = tokio::fs::read_to_string(job)
        .await
        .with_context(|| format!("failed to read '{}'", job.display()))?;
    let response = api::customize_cv(
        ctx.http(),
        &CustomizeCvRequest {
            cv,
            job_description,
            model,
        },
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn feed(ctx: &AppContext, filters: Option<&str>, cv: &[String]) -> Result<()> {
    let mut jobs = WatchStream::new(ctx.feed().subscribe());
    let mut notifications = BroadcastStream::new(ctx.notifications().subscribe());
    let mut faults = WatchStream::new(ctx.ws().subscribe_faults());

    ctx.start_realtime()?;
    if let Some(filters) = filters {
        let filters: Value = serde_json::from_str(filters).context("filters must be JSON")?;
        ctx.feed().subscribe_filters(filters);
    }
    info!("following feed, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(snapshot) = jobs.next() => {
                let Some(latest) = snapshot.first() else { continue };
                if cv.is_empty() {
                    println!("[feed] {} jobs, newest: {} @ {}", snapshot.len(), latest.title, latest.company);
                } else {
                    let best = ctx.scored_feed(cv).into_iter().next();
                    if let Some(best) = best {
                        println!(
                            "[feed] {} jobs, best match {}% {} @ {}",
                            snapshot.len(),
                            best.score.percentage,
                            best.job.title,
                            best.job.company
                        );
                    }
                }
            }
            Some(notification) = notifications.next() => match notification {
                Ok(notification) => println!("[{:?}] {}: {}", notification.level, notification.title, notification.message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => warn!(skipped, "notifications lagged"),
            },
            Some(fault) = faults.next() => {
                if let Some(fault) = fault {
                    eprintln!("{fault}");
                }
            }
        }
    }

    ctx.stop_realtime();
    Ok(())
}
