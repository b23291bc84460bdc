use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Multi-session chat relay gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the data directory tree.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP session API). Sessions connect through the configured bridge.
    Gateway {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3002)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// List the sessions of a running gateway with their status.
    Sessions {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sessions { config }) => {
            if let Err(e) = list_sessions(config).await {
                log::error!("listing sessions failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lib::gateway::run_gateway(config, path).await
}

async fn list_sessions(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    use anyhow::Context;

    let (config, _) = lib::config::load_config(config_path)?;
    let base = format!("http://{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let token = lib::config::resolve_gateway_token(&config);
    let client = reqwest::Client::new();
    let get = |url: String| {
        let req = client.get(url);
        match token.as_deref() {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    };

    let list: serde_json::Value = get(format!("{}/api/sessions", base))
        .send()
        .await
        .with_context(|| format!("connecting to gateway at {}", base))?
        .error_for_status()?
        .json()
        .await?;
    let ids: Vec<String> = list
        .get("sessions")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for id in ids {
        let detail: serde_json::Value = get(format!("{}/api/session/{}", base, id))
            .send()
            .await?
            .json()
            .await?;
        println!(
            "{}\t{}\t{}",
            id,
            detail.get("status").and_then(|v| v.as_str()).unwrap_or("-"),
            detail.get("endpoint").and_then(|v| v.as_str()).unwrap_or("-")
        );
    }
    Ok(())
}
