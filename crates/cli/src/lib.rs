pub mod commands;

use arbiter_core::domain::request::Priority;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "arbiter",
    about = "Arbiter operator CLI",
    long_about = "Submit classification requests through the expert pipeline, inspect effective configuration, and view the worker load snapshot.",
    after_help = "Examples:\n  arbiter submit --type \"Personal Loan Application\" --priority high\n  arbiter submit --type \"ESG screening\" --kill-switch\n  arbiter config\n  arbiter workers"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one request through routing, expert execution and aggregation")]
    Submit {
        #[arg(long = "type", help = "Free-text request type, e.g. \"Personal Loan Application\"")]
        request_type: String,
        #[arg(long, default_value = "medium", value_parser = parse_priority, help = "low|medium|high")]
        priority: Priority,
        #[arg(long, help = "Skip every outbound inference call and use stub output")]
        kill_switch: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Print the worker load snapshot a fresh runtime starts from")]
    Workers,
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    Priority::parse(value).ok_or_else(|| format!("unknown priority `{value}` (expected low|medium|high)"))
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Submit { request_type, priority, kill_switch } => {
            commands::submit::run(&request_type, priority, kill_switch)
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Workers => commands::workers::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
