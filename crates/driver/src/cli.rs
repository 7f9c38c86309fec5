use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dialog kernel driver.
#[derive(Debug, Parser)]
#[command(name = "dialogd", version)]
pub struct Cli {
    /// Mindset directory (team.yaml, llm.yaml, personas).
    #[arg(long, default_value = ".minds")]
    pub minds: PathBuf,

    /// Run-state directory (per-dialog snapshots, event logs).
    #[arg(long, default_value = "run")]
    pub run_dir: PathBuf,

    /// Control socket path.
    #[arg(long, default_value = "run/dialogd.sock")]
    pub socket: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the background driver process (default).
    Serve,
    /// Submit operator input to a root dialog.
    Input {
        dialog_id: String,
        content: String,
    },
    /// Stop a dialog (reason: user | emergency | free text).
    Stop {
        dialog_id: String,
        #[arg(default_value = "user")]
        reason: String,
    },
    /// Resume an interrupted dialog.
    Resume { dialog_id: String },
    /// Answer an outstanding question-for-human.
    Answer { q4h_id: String, text: String },
}
