//! tsqllint-ls - language server entry point.
//!
//! Speaks LSP over stdin/stdout and runs `tsqllint` on open T-SQL documents.
//! stdout belongs to the protocol, so logs go to
//! `~/.tsqlls/logs/tsqllint-ls.log` (or `./.tsqlls/logs/` when the home
//! directory is unusable) and only fall back to stderr when no file opens.
//!
//! ```text
//! main() -> ServerConfig::load() -> init_tracing() -> serve_stdio()
//! ```

use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tsqlls_config::ServerConfig;
use tsqlls_engine::TsqllintInvoker;

const LOG_FILE_NAME: &str = "tsqllint-ls.log";

fn init_tracing(config: Option<&ServerConfig>) {
    let default_level = config.and_then(ServerConfig::log_level).unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(config_path) = ServerConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join(LOG_FILE_NAME));
    }
    candidates.push(PathBuf::from(".tsqlls").join("logs").join(LOG_FILE_NAME));

    candidates
}

enum Command {
    Serve,
    Version,
    Help,
}

/// Unknown flags are ignored; editors pass their transport choice (`--stdio`)
/// and stdio is the only transport.
fn parse_args() -> Command {
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => return Command::Version,
            "--help" | "-h" => return Command::Help,
            _ => {}
        }
    }
    Command::Serve
}

fn print_help() {
    println!(
        "tsqllint-ls {}\n\n\
         Language server that lints T-SQL documents with tsqllint.\n\n\
         USAGE:\n    tsqllint-ls [--stdio]\n\n\
         Settings are read from ~/.tsqlls/config.toml and from the editor's\n\
         `tsqllint` configuration section. RUST_LOG overrides the log level.",
        env!("CARGO_PKG_VERSION")
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    match parse_args() {
        Command::Version => {
            println!("tsqllint-ls {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Serve => {}
    }

    let loaded = ServerConfig::load();
    let config = loaded.as_ref().ok().and_then(Option::as_ref);
    init_tracing(config);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %e.path().display(), "Ignoring config file: {e}");
            None
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tsqllint-ls");
    let result = tsqlls_lsp::serve_stdio(Arc::new(TsqllintInvoker::new()), config).await;
    if let Err(e) = &result {
        tracing::error!("Server stopped: {e:#}");
    }
    result
}
