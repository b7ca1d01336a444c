use clap::{Args, Subcommand};
use vodforge_core::JobService;

use crate::Result;

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Per-state entry counts
    Stats,
    /// Stop reserving new entries
    Pause,
    /// Resume reserving entries
    Resume,
    /// Show pause state
    Status,
    /// Currently active entries
    Active,
    /// Recently failed entries
    Failed(FailedArgs),
    /// Re-run a failed entry
    RetryEntry(EntryArgs),
    /// Remove an entry
    Remove(EntryArgs),
}

#[derive(Args, Debug)]
pub struct FailedArgs {
    #[arg(long, default_value = "10")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct EntryArgs {
    pub entry_id: i64,
}

pub fn run(service: &JobService, command: QueueCommands) -> Result<()> {
    match command {
        QueueCommands::Stats => {
            let counts = service.queue_stats()?;
            println!(
                "waiting={} active={} delayed={} completed={} failed={} total={}",
                counts.waiting,
                counts.active,
                counts.delayed,
                counts.completed,
                counts.failed,
                counts.total
            );
            Ok(())
        }
        QueueCommands::Pause => {
            service.pause()?;
            println!("queue paused");
            Ok(())
        }
        QueueCommands::Resume => {
            service.resume()?;
            println!("queue resumed");
            Ok(())
        }
        QueueCommands::Status => {
            let paused = service.is_paused()?;
            println!("queue is {}", if paused { "paused" } else { "running" });
            Ok(())
        }
        QueueCommands::Active => {
            for entry in service.active_entries()? {
                println!(
                    "entry {}  job {}  attempt {}/{}  {}%",
                    entry.id,
                    entry.job_id,
                    entry.attempts_made,
                    entry.max_attempts,
                    entry.progress
                );
            }
            Ok(())
        }
        QueueCommands::Failed(args) => {
            for entry in service.failed_entries(args.limit)? {
                println!(
                    "entry {}  job {}  attempts {}  error: {}",
                    entry.id,
                    entry.job_id,
                    entry.attempts_made,
                    entry.last_error.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        QueueCommands::RetryEntry(args) => {
            service.retry_entry(args.entry_id)?;
            println!("entry {} re-queued", args.entry_id);
            Ok(())
        }
        QueueCommands::Remove(args) => {
            service.remove_entry(args.entry_id)?;
            println!("entry {} removed", args.entry_id);
            Ok(())
        }
    }
}
