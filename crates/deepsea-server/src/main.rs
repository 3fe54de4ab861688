use std::env;

use deepsea_server::ServerBuilder;
use deepsea_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From DEEPSEA_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (deepsea.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (DEEPSEA_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        let missing = matches!(
            e,
            dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        );
        if !missing {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    deepsea_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    if env::args().any(|arg| arg == "--print-config") {
        match cfg.to_toml() {
            Ok(rendered) => {
                print!("{rendered}");
                return;
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(2);
            }
        }
    }

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    if deepsea_server::observability::apply_logging_level(&cfg.logging.level) {
        tracing::debug!(level = %cfg.logging.level, "Log level applied");
    }

    let server = ServerBuilder::new().with_config(cfg).build();
    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "Server stopped with an error");
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}

/// Resolve the configuration file path. `--print-config` renders the effective
/// configuration as TOML and exits.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: DEEPSEA_CONFIG
/// 3. Default: deepsea.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("DEEPSEA_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
