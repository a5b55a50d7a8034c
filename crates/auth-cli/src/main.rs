//! authsession - sign in, inspect and use an OAuth session from the terminal.

mod commands;
mod output;

use auth_config::{Config, Paths, Platform, Provider};
use clap::{Parser, Subcommand};
use tracing::debug;

/// authsession - OAuth session management from the command line.
#[derive(Parser)]
#[command(name = "authsession")]
#[command(about = "Sign in with Google or GitHub and make authenticated requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Session platform (native or web); overrides the config file
    #[arg(long, global = true, env = "AUTHSESSION_PLATFORM")]
    platform: Option<Platform>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser
    Login {
        /// Identity provider (google or github)
        #[arg(short, long, default_value = "google")]
        provider: Provider,
    },

    /// Show the current session
    Status,

    /// Force a token refresh
    Refresh,

    /// Send an authenticated request
    Fetch {
        /// Request URL
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body, sent as JSON when it parses as JSON
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Sign out and clear stored credentials
    Logout,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let mut config = Config::load(&paths)?;
    if let Some(platform) = cli.platform {
        config.platform = platform;
    }

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    if let Err(e) = auth_config::init_logging(&paths, log_level, false) {
        eprintln!("Warning: logging disabled: {}", e);
    }
    debug!(platform = %config.platform, base_url = %config.base_url, "CLI starting");

    let session = commands::build_session(&paths, &config)?;

    match cli.command {
        Commands::Login { provider } => commands::login(&session, provider, &cli.format).await,
        Commands::Status => commands::status(&session, &cli.format).await,
        Commands::Refresh => commands::refresh(&session, &cli.format).await,
        Commands::Fetch { url, method, data } => {
            commands::fetch(&session, &url, &method, data.as_deref(), &cli.format).await
        }
        Commands::Logout => commands::logout(&session, &cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = run(cli).await {
        output::print_error(&e.to_string(), &format);
        std::process::exit(1);
    }
}
