//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Book time-clock punches on the company portal
#[derive(Parser, Debug)]
#[command(name = "stechuhr", about = "Book time-clock punches on the company portal", version)]
pub struct Args {
    /// Path to the configuration file (defaults to $STECHUHR_CONFIG, then ./config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// The booking to perform
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Book an arrival punch
    Arrive,
    /// Book a departure punch
    Depart,
    /// Book a departure, wait, then book an arrival
    Absent {
        /// Minutes to wait between the two punches
        minutes: u64,
    },
}
