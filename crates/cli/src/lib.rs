pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use negotiator_core::config::{ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "negotiator",
    about = "Open Negotiation clarification engine CLI",
    long_about = "Talk to the clarification engine, classify one-off requests, and inspect the taxonomy and configuration.",
    after_help = "Examples:\n  negotiator chat\n  negotiator classify \"send the emails for client Acme, wave 3\"\n  negotiator doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a negotiator.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Disable the reasoning collaborator for this run")]
    offline: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive conversation (/reset starts over, /quit exits)")]
    Chat {
        #[arg(long, help = "Conversation id to use instead of a generated one")]
        conversation_id: Option<String>,
    },
    #[command(about = "Classify one request deterministically and print the chosen action as JSON")]
    Classify {
        #[arg(help = "The request text")]
        text: String,
    },
    #[command(about = "List workflow stages in taxonomy order as JSON")]
    Taxonomy,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, taxonomy, templates, and collaborator readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            overrides: ConfigOverrides {
                llm_enabled: self.offline.then_some(false),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Chat { conversation_id } => commands::chat::run(options, conversation_id),
        Command::Classify { text } => commands::classify::run(options, &text),
        Command::Taxonomy => commands::taxonomy::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
