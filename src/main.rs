use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use knowledge_graph::config::{load_config, ConfigOverrides, GatewayConfig};
use knowledge_graph::db::Database;
use knowledge_graph::errors::{KnowledgeGraphError, Result};
use knowledge_graph::http::{self, AppState};
use knowledge_graph::mcp::{McpServer, SessionRegistry};

/// Knowledge-graph memory served over MCP (stdio and HTTP).
#[derive(Parser)]
#[command(name = "knowledge-graph", version, about = "Knowledge graph MCP gateway")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// HTTP listen address
    #[arg(long)]
    host: Option<String>,
    /// HTTP listen port (default: 8080)
    #[arg(short, long)]
    port: Option<u16>,
    /// SQLite database path (default: kg.db)
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Serve MCP over stdin/stdout
    #[arg(long, value_name = "BOOL")]
    enable_stdio: Option<bool>,
    /// Serve the HTTP routes
    #[arg(long, value_name = "BOOL")]
    enable_http: Option<bool>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            db_path: self.db_path.clone(),
            enable_stdio: self.enable_stdio,
            enable_http: self.enable_http,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "knowledge-graph exited with an error");
            1
        }
    };
    // The stdin reader may still be parked on a blocking read.
    process::exit(code);
}

fn resolve_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    config.apply_overrides(cli.overrides());
    Ok(config)
}

/// Logs go to stderr so they never mix with stdio protocol output.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: GatewayConfig) -> Result<()> {
    if !config.enable_stdio && !config.enable_http {
        return Err(KnowledgeGraphError::Config {
            message: "both stdio and HTTP transports are disabled".to_string(),
        });
    }

    let db = Arc::new(Database::initialize(&config.db_path)?);
    let stats = db.stats()?;
    info!(
        db_path = %config.db_path.display(),
        entities = stats.entity_count,
        relations = stats.relation_count,
        observations = stats.observation_count,
        "knowledge graph opened"
    );

    let server = Arc::new(McpServer::new(db));
    let sessions = Arc::new(SessionRegistry::default());
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    let stdio = config.enable_stdio.then(|| {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run_stdio().await })
    });

    if !config.enable_http {
        return match stdio {
            Some(handle) => wait_for_stdio(handle, &shutdown).await,
            None => Ok(()),
        };
    }

    let addr = config.resolve_addr().await?;
    let state = AppState::new(server, sessions);
    match http::serve(state, addr, shutdown.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => match stdio {
            Some(handle) => {
                warn!(error = %e, "HTTP transport unavailable, continuing with stdio only");
                wait_for_stdio(handle, &shutdown).await
            }
            None => Err(e),
        },
    }
}

/// Waits for the stdio transport to hit EOF, or for a shutdown signal.
async fn wait_for_stdio(handle: JoinHandle<Result<()>>, shutdown: &CancellationToken) -> Result<()> {
    tokio::select! {
        joined = handle => match joined {
            Ok(result) => result,
            Err(e) => Err(KnowledgeGraphError::Transport {
                message: format!("stdio task failed: {e}"),
            }),
        },
        _ = shutdown.cancelled() => Ok(()),
    }
}
