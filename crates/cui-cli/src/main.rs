use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cui_core::config::Config;

#[derive(Parser)]
#[command(
    name = "cui",
    about = "Web UI server for the Claude CLI",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data directory (default: ~/.cui)
    #[arg(long, global = true, env = "CUI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Conversation log root (overrides config; default ~/.claude/projects)
        #[arg(long, env = "CUI_PROJECTS_DIR")]
        projects_dir: Option<PathBuf>,

        /// Path to the claude binary (overrides config)
        #[arg(long, env = "CUI_CLAUDE_BINARY")]
        claude_binary: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn load_config(data_dir: Option<PathBuf>) -> anyhow::Result<Config> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => cui_core::paths::cui_data_dir()?,
    };
    let mut config = Config::load_or_init(&data_dir)?;
    // The chosen data dir sticks, so the stores land next to the config.
    config.data_dir = Some(data_dir);
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve {
            port,
            host,
            projects_dir,
            claude_binary,
        } => (|| {
            let mut config = load_config(cli.data_dir)?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(dir) = projects_dir {
                config.projects_dir = Some(dir);
            }
            if let Some(bin) = claude_binary {
                config.claude_binary = Some(bin);
            }

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cui_server::serve(config))
        })(),
        Commands::Config => load_config(cli.data_dir).and_then(|config| {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
