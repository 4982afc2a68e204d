use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fee-ledger")]
#[command(about = "Student fee ledger with backend sync and reconciliation")]
pub struct Args {
    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to this file (the TUI defaults to fee-ledger.log)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Use an in-memory backend instead of the REST API
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive fee management (default)
    Tui,
    /// Print per-student totals
    Summary,
    /// Compare server fee totals with the ledger and correct mismatches
    Reconcile {
        /// Only this student
        #[arg(long)]
        student: Option<String>,
    },
    /// Push fee totals of every student with unsynced changes
    Retry,
    /// Mark pending fees past their due date as overdue
    RefreshOverdue,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Tui)
    }
}
