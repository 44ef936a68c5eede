use clap::{Parser, Subcommand};

use farmgate::cli::output::{print_error, OutputMode};

#[derive(Parser)]
#[command(name = "farmgate", version, about = "Session-aware client for the farm management API")]
struct Cli {
    /// Path to a config file (overrides FARMGATE_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login {
        username: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "FARMGATE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session locally and on the server
    Logout,

    /// Show whether a session is stored and when its access token expires
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Send an authorized request, refreshing the session as needed
    Request {
        /// HTTP method, e.g. GET or POST
        method: String,

        /// Path relative to the configured base URL
        path: String,

        /// Body fields as key=value or key:value
        args: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show or edit the signed-in user's profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Fetch the current profile
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Update editable fields: first_name, last_name, email, phone
    Set {
        /// Fields as key=value
        #[arg(required = true)]
        fields: Vec<String>,

        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn output_mode(&self) -> OutputMode {
        let json = match self {
            Commands::Status { json }
            | Commands::Request { json, .. }
            | Commands::Profile {
                action: ProfileAction::Show { json } | ProfileAction::Set { json, .. },
            } => *json,
            Commands::Login { .. } | Commands::Logout => false,
        };
        OutputMode::from_flag(json)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FARMGATE_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.command.output_mode();

    if let Err(e) = run(cli).await {
        print_error(&e, mode);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), farmgate::FarmgateError> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Login { username, password } => {
            farmgate::cli::session::run_login(config, &username, password.as_deref()).await
        }
        Commands::Logout => farmgate::cli::session::run_logout(config).await,
        Commands::Status { json } => farmgate::cli::session::run_status(config, json).await,
        Commands::Request {
            method,
            path,
            args,
            json,
        } => farmgate::cli::request::run_request(config, &method, &path, &args, json).await,
        Commands::Profile { action } => match action {
            ProfileAction::Show { json } => farmgate::cli::profile::run_show(config, json).await,
            ProfileAction::Set { fields, json } => {
                farmgate::cli::profile::run_set(config, &fields, json).await
            }
        },
    }
}
