mod classifier;
mod config;
mod crawl;
mod domain;
mod error;
mod input;
mod progress;
mod rate;
mod record;
mod retry;
mod shutdown;
mod writer;

use std::collections::HashSet;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use config::{Paths, RunArgs};
use crawl::LoopState;

#[derive(Parser)]
#[command(name = "wp_idn_crawler", about = "Resumable WordPress detection over a list of IDNs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every unprocessed domain and append results
    Run(RunArgs),
    /// Show result table statistics
    Stats(Paths),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(&args).await,
        Commands::Stats(paths) => stats(&paths).map(|()| ExitCode::SUCCESS),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }

    result.unwrap_or_else(|e| {
        error!("Fatal: {:#}", e);
        ExitCode::FAILURE
    })
}

async fn run(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let settings = args.settings()?;
    let shutdown = shutdown::listen();
    let state = crawl::execute(&settings, shutdown, std::io::stderr().is_terminal()).await?;
    if state == LoopState::Interrupted {
        info!("Stopped early; run again to resume");
    }
    Ok(ExitCode::from(exit_status(state)))
}

fn exit_status(state: LoopState) -> u8 {
    match state {
        LoopState::Completed | LoopState::Idle => 0,
        LoopState::Interrupted => 130,
        LoopState::Running | LoopState::Fatal => 1,
    }
}

fn stats(paths: &Paths) -> anyhow::Result<()> {
    let candidates = input::load_candidates(&paths.input, paths.delimiter_byte()?)?;
    let records = progress::load_records(&paths.output)?;
    let s = progress::summarize(&records);

    let done: HashSet<String> = records
        .iter()
        .map(|r| domain::Candidate::new(r.domain.as_str()).key().to_string())
        .collect();
    let unique: HashSet<&str> = candidates.iter().map(domain::Candidate::key).collect();
    let remaining = unique.iter().filter(|k| !done.contains(**k)).count();

    println!("Candidates: {} ({} unique)", candidates.len(), unique.len());
    println!("Recorded:   {}", s.rows);
    println!("WordPress:  {}", s.yes);
    println!("Not WP:     {}", s.no);
    println!("Unknown:    {}", s.unknown);
    println!("Remaining:  {}", remaining);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_per_state() {
        assert_eq!(exit_status(LoopState::Completed), 0);
        assert_eq!(exit_status(LoopState::Idle), 0);
        assert_eq!(exit_status(LoopState::Interrupted), 130);
        assert_eq!(exit_status(LoopState::Fatal), 1);
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(std::time::Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }
}
