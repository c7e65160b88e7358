//! Authorization server - Entry Point

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use authz_server::keys::{PrivateJwkSet, generate_es256};
use authz_server::{AuthorizationServer, Config, credentials};

#[derive(Parser, Debug)]
#[command(name = "authz-server")]
#[command(about = "OAuth 2.0 / OpenID Connect authorization server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port (overrides PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Issuer URL (overrides AUTHZ_ISSUER)
    #[arg(long, global = true)]
    issuer: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "AUTHZ_JSON_LOGS", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print a new private ES256 JWK set for AUTHZ_STATIC_JWKS
    GenerateKey,
    /// Print the argon2 hash of a client secret or password
    HashSecret {
        /// The secret to hash
        secret: String,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::GenerateKey => {
            let set = PrivateJwkSet { keys: vec![generate_es256()] };
            println!("{}", serde_json::to_string_pretty(&set)?);
            Ok(())
        }
        Command::HashSecret { secret } => {
            let hash = credentials::hash_secret(&secret).map_err(|e| anyhow::anyhow!("hashing failed: {e}"))?;
            println!("{hash}");
            Ok(())
        }
        Command::Serve => serve(cli).await,
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting authorization server");

    let mut config = Config::from_env()?;
    if let Some(issuer) = cli.issuer {
        config.issuer = issuer.trim_end_matches('/').to_string();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let server = AuthorizationServer::from_config(config).await?;
    server.run_http().await
}
