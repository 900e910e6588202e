//! stechuhr - book time-clock punches from the command line

mod cli;
mod config;
mod error;

use clap::Parser;
use cli::{Args, Command};
use error::CliError;
use std::time::Duration;
use stechuhr_client::{Credentials, PortalSession};
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let config = config::load(args.config.as_deref())?;

    let credentials = Credentials::new(config.username, config.password);
    let mut session = PortalSession::establish(config.url.as_str(), &credentials)?;
    info!("session established");

    execute(&mut session, args.command)
}

/// Dispatch one parsed command against an established session
///
/// `absent` is plain orchestration: a departure, a blocking wait on this
/// thread, then an arrival. A failed departure aborts before the wait.
fn execute(session: &mut PortalSession, command: Command) -> Result<(), CliError> {
    match command {
        Command::Arrive => {
            session.arrive()?;
            info!("booked arrival");
        }
        Command::Depart => {
            session.depart()?;
            info!("booked departure");
        }
        Command::Absent { minutes } => {
            session.depart()?;
            info!("booked departure, waiting {minutes} minute(s)");
            std::thread::sleep(absence_wait(minutes));
            session.arrive()?;
            info!("booked arrival");
        }
    }
    Ok(())
}

/// Wait between the two punches of an `absent` booking
fn absence_wait(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}
