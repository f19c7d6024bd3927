use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(
    name = "earn-price",
    version,
    about = "Reconciles S&P 500 earnings-estimate workbooks into cumulative tables"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read new workbooks from the input directory and update every output.
    Update {
        /// Compute and report the run without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Show the ledger, the tables, and pending source files.
    Status,
    /// Check that the ledger agrees with the files on disk.
    Verify {
        /// Treat warnings as failures.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Put the last ledger and table backups back in place.
    Restore,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let state = if report.ok { "ok" } else { "failed" };
    println!("{}: {state}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    for line in &report.warnings {
        println!("  warning: {line}");
    }
    for line in &report.issues {
        println!("  issue: {line}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Update { dry_run } => {
            commands::update::run(&commands::update::UpdateOptions { dry_run })?
        }
        Command::Status => commands::status::run()?,
        Command::Verify { strict } => {
            commands::verify::run(&commands::verify::VerifyOptions { strict })?
        }
        Command::Restore => commands::restore::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
