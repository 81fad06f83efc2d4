//! sitedrop-daemon binary: resolves its runtime paths, optionally detaches
//! from the terminal, and runs the ingestion server until a shutdown signal
//! arrives.

use anyhow::{Context, Result};
use clap::Parser;
use sitedrop_daemon::config::{default_config_path, load_config, Config};
use sitedrop_daemon::lifecycle::{self, PidFile};
use sitedrop_daemon::{default_db_path, default_pid_path, default_socket_path, Server};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sitedrop-daemon")]
#[command(about = "sitedrop daemon - background service for content ingestion")]
#[command(version)]
struct Args {
    /// Run in foreground (don't daemonize)
    #[arg(long)]
    foreground: bool,

    /// Socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pid: Option<PathBuf>,
}

/// Everything the daemon touches on disk. Precedence per path: command-line
/// flag, then config file, then the platform default.
struct RuntimePaths {
    socket: PathBuf,
    db: PathBuf,
    pid: PathBuf,
}

impl RuntimePaths {
    fn resolve(args: &Args, config: &Config) -> Self {
        Self {
            socket: args
                .socket
                .clone()
                .or_else(|| config.daemon_socket_path())
                .unwrap_or_else(default_socket_path),
            db: args
                .db
                .clone()
                .or_else(|| config.db_path())
                .unwrap_or_else(default_db_path),
            pid: args.pid.clone().unwrap_or_else(default_pid_path),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config_or_default();
    let paths = RuntimePaths::resolve(&args, &config);

    if args.foreground {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    } else {
        lifecycle::detach()?;
        init_file_logging(&paths)?;
    }

    serve(&paths, &config)
}

fn load_config_or_default() -> Config {
    let config_path = match default_config_path() {
        Ok(path) => path,
        Err(_) => return Config::default(),
    };
    match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "Failed to load config from {}: {}. Using defaults.",
                config_path.display(),
                err
            );
            Config::default()
        }
    }
}

/// A detached daemon has no stderr; log to a file next to the PID file.
fn init_file_logging(paths: &RuntimePaths) -> Result<()> {
    let log_path = lifecycle::log_file_path(&paths.pid);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Run the server inside a fresh runtime. The PID file lives exactly as
/// long as this function.
fn serve(paths: &RuntimePaths, config: &Config) -> Result<()> {
    let pid_file = PidFile::create(&paths.pid)?;
    tracing::info!("sitedrop-daemon starting (pid: {})", std::process::id());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let result = runtime.block_on(run_until_shutdown(paths, config));

    std::fs::remove_file(&paths.socket).ok();
    drop(pid_file);
    tracing::info!("sitedrop-daemon stopped");
    result
}

async fn run_until_shutdown(paths: &RuntimePaths, config: &Config) -> Result<()> {
    let server = Server::new(&paths.socket, &paths.db, config)?;

    tokio::select! {
        result = server.run() => result,
        signal = shutdown_signal() => {
            tracing::info!("Received {}, shutting down", signal?);
            Ok(())
        }
    }
}

/// Resolves when any of SIGTERM, SIGINT or SIGHUP arrives.
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
        _ = sighup.recv() => "SIGHUP",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitedrop_daemon::config::{DaemonConfig, StorageConfig};
    use std::path::Path;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(argv)
    }

    #[test]
    fn test_flags_take_precedence_over_config() {
        let args = parse(&[
            "sitedrop-daemon",
            "--socket",
            "/tmp/flag.sock",
            "--db",
            "/tmp/flag.db",
        ]);
        let config = Config {
            daemon: Some(DaemonConfig {
                socket: Some(PathBuf::from("/tmp/config.sock")),
                autostart: None,
            }),
            storage: Some(StorageConfig {
                db_path: Some(PathBuf::from("/tmp/config.db")),
                max_posts: None,
            }),
        };

        let paths = RuntimePaths::resolve(&args, &config);
        assert_eq!(paths.socket, Path::new("/tmp/flag.sock"));
        assert_eq!(paths.db, Path::new("/tmp/flag.db"));
    }

    #[test]
    fn test_config_fills_in_missing_flags() {
        let args = parse(&["sitedrop-daemon"]);
        let config = Config {
            daemon: Some(DaemonConfig {
                socket: Some(PathBuf::from("/tmp/config.sock")),
                autostart: None,
            }),
            storage: None,
        };

        let paths = RuntimePaths::resolve(&args, &config);
        assert_eq!(paths.socket, Path::new("/tmp/config.sock"));
        assert_eq!(paths.db, default_db_path());
        assert_eq!(paths.pid, default_pid_path());
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let args = parse(&["sitedrop-daemon"]);
        assert!(!args.foreground);

        let paths = RuntimePaths::resolve(&args, &Config::default());
        assert_eq!(paths.socket, default_socket_path());
        assert_eq!(paths.db, default_db_path());
        assert_eq!(paths.pid, default_pid_path());
    }

    #[test]
    fn test_pid_flag_overrides_default() {
        let args = parse(&["sitedrop-daemon", "--foreground", "--pid", "/tmp/x.pid"]);
        assert!(args.foreground);

        let paths = RuntimePaths::resolve(&args, &Config::default());
        assert_eq!(paths.pid, Path::new("/tmp/x.pid"));
    }
}
