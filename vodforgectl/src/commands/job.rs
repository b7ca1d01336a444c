use clap::{Args, Subcommand};
use vodforge_core::{Job, JobService, JobStatus};

use crate::{AppError, Result};

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Show one job
    Show(ShowArgs),
    /// List jobs, optionally filtered by status
    List(ListArgs),
    /// Per-status job counts
    Counts,
    /// Show a job's log history
    Logs(LogsArgs),
    /// Recent error logs across all jobs
    Errors(ErrorsArgs),
    /// Cancel a queued job
    Cancel(IdArgs),
    /// Re-queue a failed job
    Retry(IdArgs),
    /// Delete a terminal job, its logs, and its scratch directory
    Delete(IdArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub job_id: String,
    /// Include the log history
    #[arg(long)]
    pub logs: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// queued, processing, completed, or failed
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value = "1")]
    pub page: usize,
    #[arg(long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    pub job_id: String,
}

#[derive(Args, Debug)]
pub struct ErrorsArgs {
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    pub job_id: String,
}

pub fn run(service: &JobService, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::Show(args) => {
            if args.logs {
                let (job, logs) = service.get_job_with_logs(&args.job_id)?;
                if args.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "job": job,
                            "logs": logs,
                        }))?
                    );
                } else {
                    print_job(&job);
                    println!();
                    for log in logs {
                        print_log_line(&log);
                    }
                }
            } else {
                let job = service.get_job(&args.job_id)?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    print_job(&job);
                }
            }
            Ok(())
        }
        JobCommands::List(args) => {
            let status = args
                .status
                .as_deref()
                .map(|value| {
                    value
                        .parse::<JobStatus>()
                        .map_err(AppError::InvalidArgument)
                })
                .transpose()?;
            let jobs = service.list_jobs(status, args.page, args.limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in jobs {
                    println!(
                        "{}  {:<10}  {:>3}%  {}",
                        job.job_id, job.status, job.progress, job.original_key
                    );
                }
            }
            Ok(())
        }
        JobCommands::Counts => {
            let counts = service.counts()?;
            println!(
                "queued={} processing={} completed={} failed={} total={}",
                counts.queued, counts.processing, counts.completed, counts.failed, counts.total
            );
            Ok(())
        }
        JobCommands::Logs(args) => {
            let (_, logs) = service.get_job_with_logs(&args.job_id)?;
            for log in logs {
                print_log_line(&log);
            }
            Ok(())
        }
        JobCommands::Errors(args) => {
            for log in service.error_logs(args.limit)? {
                print_log_line(&log);
            }
            Ok(())
        }
        JobCommands::Cancel(args) => {
            service.cancel(&args.job_id)?;
            println!("job {} cancelled", args.job_id);
            Ok(())
        }
        JobCommands::Retry(args) => {
            let entry_id = service.retry(&args.job_id)?;
            println!("job {} re-queued as entry {entry_id}", args.job_id);
            Ok(())
        }
        JobCommands::Delete(args) => {
            service.delete_job(&args.job_id)?;
            println!("job {} deleted", args.job_id);
            Ok(())
        }
    }
}

fn print_job(job: &Job) {
    println!("job:         {}", job.job_id);
    println!("status:      {} ({}%)", job.status, job.progress);
    println!("source:      {}", job.original_key);
    println!("video name:  {}", job.video_name);
    println!("environment: {}", job.environment);
    println!(
        "resolutions: {}",
        job.resolutions
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(output_key) = &job.output_key {
        println!("output:      {output_key}");
    }
    if let Some(error) = &job.error_message {
        println!("error:       {error}");
    }
    if let Some(created) = job.created_at {
        println!("created:     {created}");
    }
    if let Some(completed) = job.completed_at {
        println!("completed:   {completed}");
    }
}

fn print_log_line(log: &vodforge_core::JobLog) {
    let timestamp = log
        .created_at
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    let stage = log.stage.as_deref().unwrap_or("-");
    println!("{timestamp} [{:<5}] [{stage}] {}", log.level, log.message);
}
