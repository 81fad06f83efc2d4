//! IPC protocol for daemon communication
//!
//! This module defines the JSON protocol for client-daemon communication.
//! Requests and responses are single JSON lines, except `Watch`, which the
//! server answers with a stream of `Response::Post` lines.

use serde::{Deserialize, Serialize};
use sitedrop_core::{Post, PostPage, StoreStats};

/// Request from client to daemon
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    /// Ingest a request body; classification is driven by the content type
    Ingest {
        content_type: String,
        /// Raw body bytes, base64 encoded for the JSON-line transport
        body_base64: String,
    },
    /// Fetch one page of posts, newest first
    List { page: usize, page_size: usize },
    /// Fetch one post by id
    Get { id: String },
    /// Delete one post by id
    Delete { id: String },
    /// Rebuild a stored archive as a downloadable ZIP
    Download { id: String },
    /// Render a stored HTML post or archive as a single sanitized document
    Render { id: String },
    /// Delete every stored post
    Clear,
    /// Number of stored posts
    Count,
    /// Storage usage estimate
    Stats,
    /// Stream recent posts, then every newly ingested post, until disconnect
    Watch,
    /// Get daemon status
    Status,
    /// Shutdown daemon
    Shutdown,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// Receipt for an ingested post
    Posted(PostReceipt),
    /// One page of posts
    Page(PostPage),
    /// A single post (also the streamed `Watch` payload)
    Post(Box<Post>),
    /// A rebuilt archive for download
    Zip {
        filename: String,
        data_base64: String,
    },
    /// A rendered, self-contained HTML document
    Html { html: String },
    /// Post count
    Count(usize),
    /// Storage usage estimate
    Stats(StoreStats),
    /// Daemon status
    Status(DaemonStatus),
    /// Success with no data
    Ok,
    /// Error with a machine-readable code and a human-readable message
    Error { code: String, message: String },
}

/// Receipt returned after a successful ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Classified content kind: "text", "html", "zip-archive" or "json"
    pub kind: String,
}

/// Daemon status information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub post_count: usize,
    pub storage: StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = Request::Ingest {
            content_type: "text/plain".to_string(),
            body_base64: "aGVsbG8=".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        match back {
            Request::Ingest { content_type, .. } => assert_eq!(content_type, "text/plain"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_error_response_carries_code_and_message() {
        let response = Response::Error {
            code: "not_found".to_string(),
            message: "No post with id abc".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("not_found"));
        let back: Response = serde_json::from_str(&json).unwrap();
        match back {
            Response::Error { code, message } => {
                assert_eq!(code, "not_found");
                assert!(message.contains("abc"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_posted_receipt_round_trip() {
        let receipt = PostReceipt {
            id: "abc".to_string(),
            timestamp: chrono::Utc::now(),
            kind: "html".to_string(),
        };
        let json = serde_json::to_string(&Response::Posted(receipt.clone())).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match back {
            Response::Posted(r) => assert_eq!(r, receipt),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_status_round_trip() {
        let status = DaemonStatus {
            uptime_secs: 3600,
            post_count: 12,
            storage: StoreStats {
                total_posts: 12,
                used_bytes: 4096,
                max_bytes: 256 * 1024 * 1024,
                used_percentage: 0,
                sampled: true,
                sample_size: 10,
            },
        };
        let json = serde_json::to_string(&Response::Status(status.clone())).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match back {
            Response::Status(s) => assert_eq!(s, status),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
