//! `rewind`: inspect and recover an agent workspace's write-ahead log.
//!
//! State lives in `.rewind/` (override with `--dir`). Mutating commands hold
//! the workspace lock for their duration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use rewind::engine::Engine;
use rewind::exit_codes;
use rewind::io::layout::DEFAULT_DIR;
use rewind::io::lock::WorkspaceLock;
use rewind::logging;
use rewind::recovery::{RecoveryOptions, RecoveryResult};

#[derive(Parser)]
#[command(
    name = "rewind",
    version,
    about = "Write-ahead log and crash recovery for agent workspaces"
)]
struct Cli {
    /// Engine working directory.
    #[arg(long, global = true, default_value = DEFAULT_DIR)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show checkpoints and whether recovery is needed (exit 2 if so).
    Status,
    /// Open a checkpoint for a task, snapshotting the given files.
    Begin {
        /// Task identifier recorded on the checkpoint.
        #[arg(long)]
        task: String,
        /// Files to snapshot.
        files: Vec<PathBuf>,
    },
    /// Mark the active checkpoint committed.
    Commit,
    /// Undo the logged mutations of a checkpoint.
    Recover {
        /// Report what would be restored without changing anything.
        #[arg(long)]
        dry_run: bool,
        /// Recover even if the checkpoint is already committed or rolled back.
        #[arg(long)]
        force: bool,
        /// Checkpoint to recover (default: most recent).
        #[arg(long)]
        checkpoint: Option<String>,
        /// Restore snapshot files from the snapshot instead of replaying them.
        #[arg(long)]
        restore_to_start: bool,
    },
    /// Rewrite every snapshot file to its captured content.
    RestoreStart {
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Compare the workspace to a checkpoint's snapshot (exit 3 on differences).
    Verify { checkpoint: String },
    /// Recover the most recent incomplete checkpoint, if any.
    AutoRecover,
    /// Parse the log and report corrupted frames (exit 3 if any).
    Inspect,
    /// Remove corrupted frames from the log after backing it up.
    Repair {
        /// Backup location (default: `<dir>/wal.log.backup`).
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Print the recovery activity log.
    Log {
        /// Delete the log instead of printing it.
        #[arg(long)]
        clear: bool,
    },
    /// List generic state records.
    States {
        /// Keep only the newest N records.
        #[arg(long)]
        prune: Option<usize>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let engine = Engine::open(&cli.dir)
        .with_context(|| format!("open working directory {}", cli.dir.display()))?;
    match cli.command {
        Command::Status => cmd_status(&engine),
        Command::Begin { task, files } => {
            let files = files
                .iter()
                .map(std::path::absolute)
                .collect::<std::io::Result<Vec<_>>>()
                .context("resolve snapshot paths")?;
            let _lock = lock(&engine)?;
            let checkpoint = engine.begin_task(&task, &files)?;
            println!("{}", checkpoint.id);
            Ok(exit_codes::OK)
        }
        Command::Commit => {
            let _lock = lock(&engine)?;
            let checkpoint = engine.commit_task()?;
            println!("{}", checkpoint.id);
            Ok(exit_codes::OK)
        }
        Command::Recover {
            dry_run,
            force,
            checkpoint,
            restore_to_start,
        } => {
            let options = RecoveryOptions {
                dry_run,
                force,
                target_checkpoint_id: checkpoint,
                restore_to_start,
            };
            let _lock = if dry_run { None } else { Some(lock(&engine)?) };
            let result = engine
                .recovery()
                .recover_with_retry(&engine.retry_policy(), &options)?;
            print_json(&result)?;
            Ok(recovery_exit_code(&result))
        }
        Command::RestoreStart { checkpoint } => {
            let _lock = lock(&engine)?;
            let result = engine
                .recovery()
                .restore_to_exact_start(checkpoint.as_deref())?;
            print_json(&result)?;
            Ok(recovery_exit_code(&result))
        }
        Command::Verify { checkpoint } => {
            let report = engine.recovery().verify_recovery(&checkpoint)?;
            print_json(&report)?;
            Ok(if report.valid {
                exit_codes::OK
            } else {
                exit_codes::INCOMPLETE
            })
        }
        Command::AutoRecover => {
            let _lock = lock(&engine)?;
            match engine.recovery().auto_recover()? {
                Some(result) => {
                    print_json(&result)?;
                    Ok(recovery_exit_code(&result))
                }
                None => {
                    println!("nothing to recover");
                    Ok(exit_codes::OK)
                }
            }
        }
        Command::Inspect => {
            let report = engine.inspect_wal()?;
            print_json(&report)?;
            Ok(if report.corrupted_frames.is_empty() {
                exit_codes::OK
            } else {
                exit_codes::INCOMPLETE
            })
        }
        Command::Repair { backup } => {
            let _lock = lock(&engine)?;
            let report = engine.repair_wal(backup.as_deref())?;
            print_json(&report)?;
            Ok(if report.success {
                exit_codes::OK
            } else {
                exit_codes::INVALID
            })
        }
        Command::Log { clear } => {
            if clear {
                let _lock = lock(&engine)?;
                engine.recovery().clear_recovery_log()?;
            } else {
                for line in engine.recovery().recovery_log()? {
                    println!("{line}");
                }
            }
            Ok(exit_codes::OK)
        }
        Command::States { prune } => {
            if let Some(keep) = prune {
                let _lock = lock(&engine)?;
                let removed = engine.states().prune_old_logs(keep)?;
                println!("pruned {removed}");
            } else {
                print_json(&engine.states().list_states()?)?;
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_status(engine: &Engine) -> Result<i32> {
    let checkpoints = engine.checkpoints().checkpoints()?;
    for checkpoint in &checkpoints {
        println!(
            "{}\t{}\t{}",
            checkpoint.id,
            checkpoint.status,
            checkpoint.task_id.as_deref().unwrap_or("-")
        );
    }
    if engine.recovery().needs_recovery()? {
        println!("needs recovery");
        Ok(exit_codes::NEEDS_RECOVERY)
    } else {
        println!("clean ({} checkpoints)", checkpoints.len());
        Ok(exit_codes::OK)
    }
}

fn lock(engine: &Engine) -> Result<WorkspaceLock> {
    WorkspaceLock::try_acquire(&engine.paths().lock_path)
}

fn recovery_exit_code(result: &RecoveryResult) -> i32 {
    if result.success {
        exit_codes::OK
    } else if result.finalized {
        exit_codes::INCOMPLETE
    } else {
        exit_codes::INVALID
    }
}

/// Pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
