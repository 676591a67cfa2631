use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log_sender::config::resolve_config_path;
use log_sender::report::ReportRequest;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "log-sender")]
#[command(about = "Ships the learning platform event log to an LRS", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the export on its interval until Ctrl+C
    Run,
    /// Perform a single export run
    Once,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Runtime settings kept in the database
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// List log targets and whether they are exported
    Targets,
    /// Request a time-usage report for a user
    Report {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        requestor: i64,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        end: NaiveDate,
        /// Idle threshold in minutes
        #[arg(long, default_value_t = 0)]
        idle_time: u32,
        /// Borrowed time in minutes
        #[arg(long, default_value_t = 0)]
        borrowed_time: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[derive(Subcommand)]
enum SettingsAction {
    Get { name: String },
    Set { name: String, value: String },
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_sender=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            log_sender::cli::run::run(config_path).await?;
        }
        Some(Commands::Once) => {
            log_sender::cli::run::once(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                log_sender::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                log_sender::cli::config::validate(config_path)?;
            }
        },
        Some(Commands::Settings { action }) => match action {
            SettingsAction::Get { name } => {
                log_sender::cli::settings::get(config_path, &name).await?;
            }
            SettingsAction::Set { name, value } => {
                log_sender::cli::settings::set(config_path, &name, &value).await?;
            }
            SettingsAction::List => {
                log_sender::cli::settings::list(config_path).await?;
            }
        },
        Some(Commands::Targets) => {
            log_sender::cli::targets::list(config_path).await?;
        }
        Some(Commands::Report {
            user,
            requestor,
            start,
            end,
            idle_time,
            borrowed_time,
        }) => {
            let request = ReportRequest {
                user_id: user,
                requestor_id: requestor,
                start_date: start,
                end_date: end,
                idle_time,
                borrowed_time,
            };
            log_sender::cli::report::request(config_path, request).await?;
        }
    }

    Ok(())
}
