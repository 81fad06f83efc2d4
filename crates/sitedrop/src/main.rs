//! sitedrop - content drop box CLI
//!
//! Drop HTML pages, ZIP'd sites, JSON and plain text into a local store
//! and read them back.
//!
//! Usage:
//!   sitedrop post page.html       Ingest a file
//!   sitedrop list                 List stored posts
//!   sitedrop get <id>             Show one post
//!   sitedrop download <id>       Rebuild a stored site archive as a ZIP
//!   sitedrop render <id>          Render a post as one sanitized document
//!   sitedrop watch                Stream posts as they arrive
//!   sitedrop daemon start         Start the daemon
//!   sitedrop daemon stop          Stop the daemon
//!   sitedrop daemon status        Show daemon status

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sitedrop_core::{Content, HtmlContent, Post};
use sitedrop_daemon::{
    config::{default_config_path, load_config},
    default_pid_path, default_socket_path, kill_daemon, read_daemon_pid, Client,
};
use std::io::Read;
use std::path::PathBuf;
use std::process::Command;

/// Find the sitedrop-daemon binary.
/// First looks in the same directory as the current executable,
/// then falls back to searching PATH.
fn find_daemon_binary() -> PathBuf {
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(exe_dir) = current_exe.parent() {
            let daemon_path = exe_dir.join("sitedrop-daemon");
            if daemon_path.exists() {
                return daemon_path;
            }
        }
    }
    // Fall back to PATH lookup
    PathBuf::from("sitedrop-daemon")
}

fn resolved_socket_path() -> PathBuf {
    let config_path = match default_config_path() {
        Ok(path) => path,
        Err(_) => return default_socket_path(),
    };

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(_) => return default_socket_path(),
    };

    config
        .daemon_socket_path()
        .unwrap_or_else(default_socket_path)
}

/// Guess a content type from a filename suffix. The daemon's classifier
/// treats anything unknown as text.
fn guess_content_type(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("zip") => "application/zip",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

#[derive(Parser)]
#[command(name = "sitedrop")]
#[command(about = "Content drop box - ingest and browse HTML, sites and notes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file (or stdin) as a new post
    Post {
        /// File to ingest (reads stdin when omitted)
        file: Option<PathBuf>,
        /// Override the content type sent to the daemon
        #[arg(long, value_name = "TYPE")]
        content_type: Option<String>,
    },
    /// List stored posts, newest first
    List {
        /// Page to fetch
        #[arg(short, long, default_value = "1")]
        page: usize,
        /// Posts per page (1-50)
        #[arg(short = 'n', long, default_value = "20")]
        page_size: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one post
    Get {
        /// Post id
        id: String,
        /// Output the full post as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete one post
    Delete {
        /// Post id
        id: String,
    },
    /// Rebuild a stored site archive as a downloadable ZIP
    Download {
        /// Post id
        id: String,
        /// Output path (defaults to the archive's original filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render a stored HTML post or site archive as one sanitized document
    Render {
        /// Post id
        id: String,
        /// Write the document to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete every stored post
    Clear,
    /// Show the number of stored posts
    Count,
    /// Show storage usage
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stream posts as they arrive (recent posts first)
    Watch {
        /// Output each post as JSON
        #[arg(long)]
        json: bool,
    },
    /// Daemon management commands
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Post { file, content_type } => cmd_post(file, content_type),
        Commands::List {
            page,
            page_size,
            json,
        } => cmd_list(page, page_size, json),
        Commands::Get { id, json } => cmd_get(&id, json),
        Commands::Delete { id } => cmd_delete(&id),
        Commands::Download { id, output } => cmd_download(&id, output),
        Commands::Render { id, output } => cmd_render(&id, output),
        Commands::Clear => cmd_clear(),
        Commands::Count => cmd_count(),
        Commands::Stats { json } => cmd_stats(json),
        Commands::Watch { json } => cmd_watch(json),
        Commands::Daemon { action } => match action {
            DaemonAction::Start { foreground } => cmd_daemon_start(foreground),
            DaemonAction::Stop => cmd_daemon_stop(),
            DaemonAction::Status { json } => cmd_daemon_status(json),
        },
    }
}

/// Connect to the daemon, autostarting it when configured to do so.
fn connect() -> Result<Client> {
    let socket_path = resolved_socket_path();
    let client = Client::new(&socket_path);
    if client.is_daemon_running() {
        return Ok(client);
    }

    let config = default_config_path()
        .and_then(|path| load_config(&path))
        .unwrap_or_default();
    if !config.autostart() {
        anyhow::bail!("Daemon not running. Start it with: sitedrop daemon start");
    }

    start_daemon_background()?;
    let client = Client::new(&socket_path);
    if client.is_daemon_running() {
        Ok(client)
    } else {
        anyhow::bail!("Daemon failed to start")
    }
}

fn cmd_post(file: Option<PathBuf>, content_type: Option<String>) -> Result<()> {
    let (body, inferred_type) = match &file {
        Some(path) => {
            let body = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (body, guess_content_type(path))
        }
        None => {
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("Failed to read stdin")?;
            (body, "text/plain")
        }
    };

    let content_type = content_type.as_deref().unwrap_or(inferred_type);
    let client = connect()?;
    let receipt = client.ingest(content_type, &body)?;

    println!(
        "{} {} post {}",
        "Posted".green().bold(),
        receipt.kind,
        receipt.id
    );
    Ok(())
}

fn cmd_list(page: usize, page_size: usize, json: bool) -> Result<()> {
    let client = connect()?;
    let result = client.list(page, page_size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.posts.is_empty() {
        println!("{}", "No posts".yellow());
        return Ok(());
    }

    for post in &result.posts {
        print_post_line(post);
    }
    println!();
    println!(
        "Page {}/{} ({} posts total{})",
        result.pagination.page,
        result.pagination.total_pages,
        result.pagination.total_posts,
        if result.pagination.has_more {
            ", more available"
        } else {
            ""
        }
    );
    Ok(())
}

fn cmd_get(id: &str, json: bool) -> Result<()> {
    let client = connect()?;
    let post = client.get(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&post)?);
        return Ok(());
    }

    println!("{}: {}", "Id".cyan().bold(), post.id);
    println!("{}: {}", "Time".cyan().bold(), post.timestamp);
    println!("{}: {}", "Kind".cyan().bold(), post.content.kind());
    match &post.content {
        Content::Text(text) => {
            println!();
            println!("{}", text.content);
        }
        Content::Html(html) => print_html_summary(html),
        Content::ZipArchive(archive) => {
            println!(
                "{}: {} ({} files, main {})",
                "Archive".cyan().bold(),
                archive.metadata.filename,
                archive.metadata.file_count,
                archive.main_file
            );
            print_html_summary(&archive.html);
        }
        Content::Json(value) => {
            println!();
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

fn print_html_summary(html: &HtmlContent) {
    match html.metadata() {
        Some(meta) => {
            println!("{}: {}", "Title".cyan().bold(), meta.title);
            if !meta.description.is_empty() {
                println!("{}: {}", "Description".cyan().bold(), meta.description);
            }
            println!(
                "{}: {} links, {} headings, {} images",
                "Structure".cyan().bold(),
                meta.links.len(),
                meta.headings.len(),
                meta.images.len()
            );
        }
        None => println!("{}: could not be parsed", "Title".cyan().bold()),
    }
}

fn cmd_delete(id: &str) -> Result<()> {
    let client = connect()?;
    client.delete(id)?;
    println!("{} post {}", "Deleted".green().bold(), id);
    Ok(())
}

fn cmd_download(id: &str, output: Option<PathBuf>) -> Result<()> {
    let client = connect()?;
    let (filename, data) = client.download(id)?;

    let output = output.unwrap_or_else(|| PathBuf::from(&filename));
    std::fs::write(&output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} {} ({} bytes) to {}",
        "Downloaded".green().bold(),
        filename,
        data.len(),
        output.display()
    );
    Ok(())
}

fn cmd_render(id: &str, output: Option<PathBuf>) -> Result<()> {
    let client = connect()?;
    let html = client.render(id)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} {} ({} bytes) to {}",
                "Rendered".green().bold(),
                id,
                html.len(),
                path.display()
            );
        }
        None => println!("{html}"),
    }
    Ok(())
}

fn cmd_clear() -> Result<()> {
    let client = connect()?;
    let count = client.count()?;
    client.clear()?;
    println!("{} {} posts", "Cleared".green().bold(), count);
    Ok(())
}

fn cmd_count() -> Result<()> {
    let client = connect()?;
    println!("{}", client.count()?);
    Ok(())
}

fn cmd_stats(json: bool) -> Result<()> {
    let client = connect()?;
    let stats = client.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Storage".cyan().bold());
    println!("Posts:  {}", stats.total_posts);
    println!(
        "Usage:  {} of {} ({}%){}",
        format_bytes(stats.used_bytes),
        format_bytes(stats.max_bytes),
        stats.used_percentage,
        if stats.sampled {
            format!(" - estimated from {} posts", stats.sample_size)
        } else {
            String::new()
        }
    );
    Ok(())
}

fn cmd_watch(json: bool) -> Result<()> {
    let client = connect()?;
    println!("{} (ctrl-c to stop)", "Watching for posts".cyan().bold());

    client.watch(|post| {
        if json {
            match serde_json::to_string(&post) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Failed to serialize post: {e}"),
            }
        } else {
            print_post_line(&post);
        }
        true
    })
}

fn print_post_line(post: &Post) {
    let summary = match &post.content {
        Content::Text(text) => preview(&text.content),
        Content::Html(html) => html
            .metadata()
            .map(|meta| meta.title.clone())
            .unwrap_or_else(|| "(unparsed HTML)".to_string()),
        Content::ZipArchive(archive) => format!(
            "{} ({} files)",
            archive.metadata.filename, archive.metadata.file_count
        ),
        Content::Json(value) => preview(&value.to_string()),
    };

    println!(
        "{}  {}  {:<11}  {}",
        post.id.dimmed(),
        post.timestamp.format("%Y-%m-%d %H:%M:%S"),
        post.content.kind().cyan(),
        summary
    );
}

/// First line of the text, truncated for list output.
fn preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 60;
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > MAX_PREVIEW_CHARS {
        let truncated: String = first_line.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        first_line.to_string()
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Start the daemon in the background and wait for it to come up.
fn start_daemon_background() -> Result<()> {
    let pid_path = default_pid_path();
    let daemon_binary = find_daemon_binary();

    println!("Starting daemon...");
    let child = Command::new(&daemon_binary)
        .spawn()
        .context("Failed to start daemon")?;

    // Poll for startup with increasing delays (total ~2.5s max)
    let socket_path = resolved_socket_path();
    for delay_ms in [100, 200, 400, 800, 1000] {
        std::thread::sleep(std::time::Duration::from_millis(delay_ms));
        if read_daemon_pid(&pid_path)?.is_some() {
            let client = Client::new(&socket_path);
            if client.is_daemon_running() {
                drop(child);
                return Ok(());
            }
        }
    }

    drop(child);
    anyhow::bail!(
        "Daemon may have failed to start. Check logs at {:?}",
        pid_path.parent().map(|p| p.join("sitedrop-daemon.log"))
    )
}

fn cmd_daemon_start(foreground: bool) -> Result<()> {
    let pid_path = default_pid_path();

    // Check if already running
    if let Some(pid) = read_daemon_pid(&pid_path)? {
        println!(
            "{} Daemon already running (pid {})",
            "Note:".yellow().bold(),
            pid
        );
        return Ok(());
    }

    if foreground {
        // Run in foreground - exec the daemon binary
        println!("Starting daemon in foreground...");
        let status = Command::new(find_daemon_binary())
            .arg("--foreground")
            .status()
            .context("Failed to start daemon")?;
        if !status.success() {
            anyhow::bail!("Daemon exited with error");
        }
        return Ok(());
    }

    start_daemon_background()?;
    if let Some(pid) = read_daemon_pid(&pid_path)? {
        println!("{} (pid {})", "Daemon started".green().bold(), pid);
    }
    Ok(())
}

/// Stop the daemon
fn cmd_daemon_stop() -> Result<()> {
    let pid_path = default_pid_path();
    let socket_path = resolved_socket_path();

    // First try graceful shutdown via socket
    let client = Client::new(&socket_path);
    if client.is_daemon_running() {
        println!("Requesting daemon shutdown...");
        if client.shutdown().is_ok() {
            // Wait for graceful shutdown
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }

    // Check if still running and kill if necessary
    if let Some(pid) = read_daemon_pid(&pid_path)? {
        println!("Stopping daemon (pid {pid})...");
        if kill_daemon(&pid_path)? {
            println!("{}", "Daemon stopped".green().bold());
        }
    } else {
        println!("{}", "Daemon not running".yellow());
    }

    // Clean up socket file
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).ok();
    }

    Ok(())
}

/// Show daemon status
fn cmd_daemon_status(json: bool) -> Result<()> {
    let pid_path = default_pid_path();
    let socket_path = resolved_socket_path();

    let daemon_pid = read_daemon_pid(&pid_path)?;
    let daemon_status = if daemon_pid.is_some() {
        Client::new(&socket_path).status().ok()
    } else {
        None
    };

    if json {
        #[derive(serde::Serialize)]
        struct DaemonStatusJson {
            running: bool,
            pid: Option<u32>,
            uptime_secs: Option<u64>,
            post_count: Option<usize>,
            socket: String,
            pid_file: String,
        }

        let output = DaemonStatusJson {
            running: daemon_pid.is_some(),
            pid: daemon_pid,
            uptime_secs: daemon_status.as_ref().map(|s| s.uptime_secs),
            post_count: daemon_status.as_ref().map(|s| s.post_count),
            socket: socket_path.display().to_string(),
            pid_file: pid_path.display().to_string(),
        };

        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Daemon Status".cyan().bold());
    println!();

    match daemon_pid {
        Some(pid) => {
            println!("Status: {} (pid {})", "running".green(), pid);
            if let Some(status) = daemon_status {
                println!("Uptime: {}", format_duration(status.uptime_secs));
                println!("Posts:  {}", status.post_count);
                println!(
                    "Usage:  {} ({}%)",
                    format_bytes(status.storage.used_bytes),
                    status.storage.used_percentage
                );
            }
        }
        None => println!("Status: {}", "not running".yellow()),
    }
    println!();
    println!("Socket: {}", socket_path.display());
    println!("PID:    {}", pid_path.display());
    Ok(())
}
