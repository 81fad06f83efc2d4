//! sitedrop-daemon: Library for the sitedrop daemon
//!
//! This crate provides:
//! - Unix socket server for IPC
//! - Client library for communicating with the daemon
//! - Protocol types for client-daemon communication

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use client::{kill_daemon, read_daemon_pid, Client};
pub use lifecycle::PidFile;
pub use protocol::{DaemonStatus, PostReceipt, Request, Response};
pub use server::{default_db_path, default_pid_path, default_socket_path, Server};
