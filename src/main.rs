use anyhow::Result;
use clap::{Parser, Subcommand};
use token_service::{app, comms, utils};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "token-service", version, about = "Bearer-token issuance service")]
struct AppCli {
    /// Directory holding base.yml and <environment>.yml
    #[arg(long, default_value = "configuration", global = true)]
    config_dir: String,

    /// Environment overlay to apply on top of base.yml
    #[arg(long, env = "ENVIRONMENT", default_value = "dev", global = true)]
    environment: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Print the route table
    Routes,
    /// Load and validate configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    let environment = args.environment.to_lowercase();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = app::config::Config::load(&args.config_dir, &environment)?;

            let tracer_provider = config
                .telemetry
                .endpoint()
                .map(|endpoint| utils::telemetry::init_provider(endpoint, &environment));
            let (tracer_provider, telemetry_error) = match tracer_provider {
                Some(Ok(provider)) => (Some(provider), None),
                Some(Err(e)) => (None, Some(e)),
                None => (None, None),
            };
            utils::logging::init(args.log_json, tracer_provider.as_ref());

            info!(environment = %environment, version = token_service::VERSION, "Starting token service");
            match (&tracer_provider, telemetry_error) {
                (Some(_), _) => info!(
                    endpoint = config.telemetry.endpoint().unwrap_or(""),
                    "exporting traces over OTLP"
                ),
                (None, Some(e)) => warn!("trace export disabled: {:#}", e),
                (None, None) => {}
            }

            app::server::serve(config, tracer_provider).await?;
        }
        Commands::Routes => {
            for route in comms::api::ROUTES {
                println!(
                    "[{}]: '{}' has {} middlewares",
                    route.method, route.path, route.middlewares
                );
            }
        }
        Commands::CheckConfig => {
            utils::logging::init(args.log_json, None);
            let config = app::config::Config::load(&args.config_dir, &environment)?;
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
