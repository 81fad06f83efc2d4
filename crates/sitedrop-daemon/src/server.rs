//! Unix socket server for daemon IPC
//!
//! Handles JSON-line requests from CLI clients over Unix domain sockets.
//! Every request is answered with a single JSON line, except `Watch`,
//! which streams recent posts and then every newly ingested post until
//! the client disconnects.

use crate::config::Config;
use crate::protocol::{DaemonStatus, PostReceipt, Request, Response};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use sitedrop_core::{
    classify, inline_assets, rebuild_zip, sanitize_html, Content, Post, PostStore, SitedropError,
    SqliteKv,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Number of recent posts sent at the start of a watch stream
const WATCH_RECENT_POSTS: usize = 20;

/// Shared state for the daemon
pub struct DaemonState {
    pub store: PostStore,
    pub start_time: Instant,
}

/// Unix socket server for IPC
pub struct Server {
    listener: UnixListener,
    state: Arc<DaemonState>,
}

impl Server {
    /// Create a new server bound to the given socket path
    pub fn new(socket_path: &Path, db_path: &Path, config: &Config) -> Result<Self> {
        // Remove stale socket file if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
        }

        let listener = UnixListener::bind(socket_path).context("Failed to bind to Unix socket")?;

        // Set socket permissions (owner only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(socket_path, perms)
                .context("Failed to set socket permissions")?;
        }

        tracing::info!("Listening on {:?}", socket_path);

        let kv = SqliteKv::new(db_path).context("Failed to open database")?;
        let store = PostStore::with_capacity(Box::new(kv), config.max_posts());
        tracing::info!(
            "Store ready: {} posts, retention cap {}",
            store.count().unwrap_or(0),
            config.max_posts()
        );

        let state = Arc::new(DaemonState {
            store,
            start_time: Instant::now(),
        });

        Ok(Self { listener, state })
    }

    /// Run the server event loop
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Server ready, accepting connections");

        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Read one line (JSON request)
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(()); // Client disconnected
    }

    let request: Request = match serde_json::from_str(&line) {
        Ok(req) => req,
        Err(e) => {
            let response = Response::Error {
                code: "invalid_request".to_string(),
                message: format!("Invalid request: {e}"),
            };
            write_response(&mut writer, &response).await?;
            return Ok(());
        }
    };

    // Watch holds the connection open and streams posts
    if matches!(request, Request::Watch) {
        return handle_watch(reader, writer, state).await;
    }

    let response = handle_request(request, &state).await;
    write_response(&mut writer, &response).await
}

async fn write_response(
    writer: &mut (impl AsyncWriteExt + Unpin),
    response: &Response,
) -> Result<()> {
    let response_json = serde_json::to_string(response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

/// Handle a parsed request
async fn handle_request(request: Request, state: &DaemonState) -> Response {
    match request {
        Request::Ingest {
            content_type,
            body_base64,
        } => handle_ingest(&content_type, &body_base64, state).await,
        Request::List { page, page_size } => {
            or_error(state.store.get_page(page, page_size).map(Response::Page))
        }
        Request::Get { id } => or_error(state.store.get(&id).map(|p| Response::Post(Box::new(p)))),
        Request::Delete { id } => or_error(state.store.delete(&id).map(|()| Response::Ok)),
        Request::Download { id } => handle_download(&id, state),
        Request::Render { id } => handle_render(&id, state),
        Request::Clear => or_error(state.store.clear().map(|()| Response::Ok)),
        Request::Count => or_error(state.store.count().map(Response::Count)),
        Request::Stats => or_error(state.store.stats().map(Response::Stats)),
        Request::Status => handle_status(state),
        Request::Watch => unreachable!("watch is handled at the connection level"),
        Request::Shutdown => {
            tracing::info!("Shutdown requested");
            // The daemon will be terminated by the caller
            Response::Ok
        }
    }
}

fn or_error(result: sitedrop_core::Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &SitedropError) -> Response {
    Response::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

/// Handle an ingest request: decode, classify, store
async fn handle_ingest(content_type: &str, body_base64: &str, state: &DaemonState) -> Response {
    let body = match BASE64.decode(body_base64) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            return Response::Error {
                code: "invalid_request".to_string(),
                message: format!("Invalid body encoding: {e}"),
            }
        }
    };

    let content = match classify(content_type, body).await {
        Ok(content) => content,
        Err(err) => return error_response(&err),
    };

    match state.store.add(Post::new(content)) {
        Ok(post) => {
            tracing::info!("Ingested {} post {}", post.content.kind(), post.id);
            Response::Posted(PostReceipt {
                id: post.id,
                timestamp: post.timestamp,
                kind: post.content.kind().to_string(),
            })
        }
        Err(err) => error_response(&err),
    }
}

/// Handle a download request: rebuild the stored archive as a ZIP stream
fn handle_download(id: &str, state: &DaemonState) -> Response {
    let post = match state.store.get(id) {
        Ok(post) => post,
        Err(err) => return error_response(&err),
    };

    let Content::ZipArchive(archive) = &post.content else {
        return error_response(&SitedropError::NotAnArchive(id.to_string()));
    };

    match rebuild_zip(archive) {
        Ok(data) => Response::Zip {
            filename: archive.metadata.filename.clone(),
            data_base64: BASE64.encode(&data),
        },
        Err(err) => error_response(&err),
    }
}

/// Handle a render request: produce one sanitized, self-contained HTML
/// document. Archives get their same-archive assets inlined first; plain
/// HTML posts are sanitized as stored.
fn handle_render(id: &str, state: &DaemonState) -> Response {
    let post = match state.store.get(id) {
        Ok(post) => post,
        Err(err) => return error_response(&err),
    };

    let html = match &post.content {
        Content::Html(html) => html.html().to_string(),
        Content::ZipArchive(archive) => {
            match inline_assets(archive.html.html(), &archive.main_file, &archive.file_contents) {
                Ok(html) => html,
                Err(err) => return error_response(&err),
            }
        }
        _ => return error_response(&SitedropError::NotRenderable(id.to_string())),
    };

    Response::Html {
        html: sanitize_html(&html),
    }
}

/// Handle status request
fn handle_status(state: &DaemonState) -> Response {
    let uptime = state.start_time.elapsed().as_secs();

    let storage = match state.store.stats() {
        Ok(stats) => stats,
        Err(err) => return error_response(&err),
    };

    Response::Status(DaemonStatus {
        uptime_secs: uptime,
        post_count: storage.total_posts,
        storage,
    })
}

/// Stream recent posts, then live ingests, until the client disconnects.
///
/// The store subscription stays registered for the lifetime of the
/// connection; dropping the guard at the end deregisters it.
async fn handle_watch(
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    state: Arc<DaemonState>,
) -> Result<()> {
    // Subscribe before the catch-up read so no post falls in the gap
    let (tx, rx) = mpsc::unbounded_channel::<Post>();
    let _subscription = state.store.subscribe(move |post| {
        // Receiver gone means the client hung up; nothing to do
        let _ = tx.send(post.clone());
    });

    let recent = state
        .store
        .get_page(1, WATCH_RECENT_POSTS)
        .map(|page| page.posts)
        .unwrap_or_default();

    stream_posts(reader, writer, recent, rx).await
}

/// Write the catch-up posts, then live posts from the channel, until the
/// client disconnects.
///
/// A post ingested between the subscription and the catch-up read arrives on
/// both sides; catch-up ids are remembered and the channel copy is dropped,
/// so each post is delivered exactly once.
async fn stream_posts(
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    mut writer: tokio::net::unix::OwnedWriteHalf,
    recent: Vec<Post>,
    mut rx: mpsc::UnboundedReceiver<Post>,
) -> Result<()> {
    let mut caught_up: HashSet<String> = recent.iter().map(|post| post.id.clone()).collect();
    for post in recent {
        write_response(&mut writer, &Response::Post(Box::new(post))).await?;
    }

    let mut drain = String::new();
    loop {
        tokio::select! {
            post = rx.recv() => {
                let Some(post) = post else { break };
                if caught_up.remove(&post.id) {
                    continue;
                }
                if write_response(&mut writer, &Response::Post(Box::new(post))).await.is_err() {
                    break;
                }
            }
            read = reader.read_line(&mut drain) => {
                // EOF or error means the client disconnected
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => drain.clear(),
                }
            }
        }
    }

    tracing::debug!("watch client disconnected");
    Ok(())
}

/// Get the default socket path
pub fn default_socket_path() -> PathBuf {
    // macOS: ~/Library/Application Support/sitedrop/daemon.sock
    // Linux: ~/.local/share/sitedrop/daemon.sock
    directories::ProjectDirs::from("", "", "sitedrop")
        .map(|dirs| dirs.data_dir().join("daemon.sock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/sitedrop-daemon.sock"))
}

/// Get the default database path
pub fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "sitedrop")
        .map(|dirs| dirs.data_dir().join("posts.db"))
        .unwrap_or_else(|| PathBuf::from("/tmp/sitedrop-posts.db"))
}

/// Get the default PID file path
pub fn default_pid_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "sitedrop")
        .map(|dirs| dirs.data_dir().join("daemon.pid"))
        .unwrap_or_else(|| PathBuf::from("/tmp/sitedrop-daemon.pid"))
}
