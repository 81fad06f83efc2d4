//! Bounded, ordered post store with subscriber fan-out.
//!
//! Layout in the key-value engine:
//! - `post_ids`: JSON array of ids, newest first, capped at [`MAX_POSTS`]
//! - `post:{id}`: JSON-serialized [`Post`]
//!
//! Invariant: every id in the index has a stored post and vice versa.
//! `add`/`delete`/`clear` are read-modify-write sequences over the index;
//! the store serializes them through an internal write lock, which is the
//! concurrency contract for a store instance. Two store instances over the
//! same engine still race last-write-wins on the index.

use crate::content::Post;
use crate::error::{Result, SitedropError};
use crate::kv::Kv;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Retention cap: oldest posts beyond this are evicted on insert.
pub const MAX_POSTS: usize = 500;
/// Default page size for paginated reads.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Page size bounds for paginated reads.
pub const MAX_PAGE_SIZE: usize = 50;

const INDEX_KEY: &str = "post_ids";
const POST_KEY_PREFIX: &str = "post:";

/// Usage stats are extrapolated from at most this many sampled posts.
const MAX_SAMPLE_SIZE: usize = 10;
/// Approximate per-key engine overhead, in bytes.
const PER_KEY_OVERHEAD: u64 = 50;
/// Notional storage budget used for the percentage readout (256 MiB).
const STORAGE_BUDGET_BYTES: u64 = 256 * 1024 * 1024;
/// Conservative per-post estimate when no sample could be fetched.
const FALLBACK_POST_BYTES: u64 = 5000;

type SubscriberFn = Arc<dyn Fn(&Post) + Send + Sync>;

/// Bounded post store over a key-value engine.
///
/// Cheap to clone; clones share the same engine, write lock and subscriber
/// set.
#[derive(Clone)]
pub struct PostStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    kv: Box<dyn Kv>,
    max_posts: usize,
    /// Serializes index read-modify-write sequences.
    write_lock: Mutex<()>,
    subscribers: Mutex<HashMap<u64, SubscriberFn>>,
    next_subscriber_id: AtomicU64,
}

/// Deregisters its subscriber when dropped.
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.subscribers.lock().unwrap().remove(&self.id);
        }
    }
}

/// One page of posts plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_posts: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

/// Estimated storage usage, extrapolated from a bounded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_posts: usize,
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub used_percentage: u8,
    /// True when the estimate comes from a sample rather than every post.
    pub sampled: bool,
    pub sample_size: usize,
}

impl PostStore {
    /// Create a store over the given engine with the default retention cap.
    pub fn new(kv: Box<dyn Kv>) -> Self {
        Self::with_capacity(kv, MAX_POSTS)
    }

    /// Create a store with an explicit retention cap (used by tests and the
    /// daemon's config override).
    pub fn with_capacity(kv: Box<dyn Kv>, max_posts: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                kv,
                max_posts: max_posts.max(1),
                write_lock: Mutex::new(()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(0),
            }),
        }
    }

    /// Persist a post, update the index, evict overflow, notify subscribers.
    ///
    /// Assigns a fresh id when the post has none. Returns the stored post.
    pub fn add(&self, mut post: Post) -> Result<Post> {
        if post.id.is_empty() {
            post.id = Uuid::new_v4().to_string();
        }

        let bytes = serde_json::to_vec(&post).map_err(SitedropError::Parse)?;
        let inner = &self.inner;

        {
            let _guard = inner.write_lock.lock().unwrap();

            inner
                .kv
                .set(&post_key(&post.id), &bytes)
                .map_err(SitedropError::Storage)?;

            let mut ids = self.read_index()?;
            ids.insert(0, post.id.clone());

            if ids.len() > inner.max_posts {
                let evicted: Vec<String> =
                    ids.split_off(inner.max_posts).iter().map(|id| post_key(id)).collect();
                tracing::debug!("evicting {} posts past the retention cap", evicted.len());
                inner.kv.delete(&evicted).map_err(SitedropError::Storage)?;
            }

            self.write_index(&ids)?;
        }

        self.notify(&post);
        Ok(post)
    }

    /// All stored posts in index order (newest first). Ids whose post is
    /// missing are skipped.
    pub fn get_all(&self) -> Result<Vec<Post>> {
        let ids = self.read_index()?;
        self.fetch_posts(&ids)
    }

    /// One page of posts. `page_size` is clamped to `[1, 50]`, `page` to at
    /// least 1.
    pub fn get_page(&self, page: usize, page_size: usize) -> Result<PostPage> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let page = page.max(1);

        let ids = self.read_index()?;
        let total_posts = ids.len();
        let total_pages = total_posts.div_ceil(page_size);

        // Saturate: `page` comes off the wire and can be arbitrarily large
        let start = page.saturating_sub(1).saturating_mul(page_size);
        let end = start.saturating_add(page_size).min(total_posts);
        let posts = if start < total_posts {
            self.fetch_posts(&ids[start..end])?
        } else {
            Vec::new()
        };

        Ok(PostPage {
            posts,
            pagination: Pagination {
                page,
                page_size,
                total_posts,
                total_pages,
                has_more: end < total_posts,
            },
        })
    }

    /// Fetch one post by id.
    pub fn get(&self, id: &str) -> Result<Post> {
        let bytes = self
            .inner
            .kv
            .get(&post_key(id))
            .map_err(SitedropError::Storage)?
            .ok_or_else(|| SitedropError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(SitedropError::Parse)
    }

    /// Delete one post and drop its id from the index.
    pub fn delete(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().unwrap();

        let key = post_key(id);
        let removed = inner
            .kv
            .delete(std::slice::from_ref(&key))
            .map_err(SitedropError::Storage)?;
        if removed == 0 {
            return Err(SitedropError::NotFound(id.to_string()));
        }

        let ids: Vec<String> = self
            .read_index()?
            .into_iter()
            .filter(|existing| existing != id)
            .collect();
        self.write_index(&ids)
    }

    /// Delete every post referenced by the index, then the index itself.
    pub fn clear(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().unwrap();

        let ids = self.read_index()?;
        if !ids.is_empty() {
            let keys: Vec<String> = ids.iter().map(|id| post_key(id)).collect();
            inner.kv.delete(&keys).map_err(SitedropError::Storage)?;
        }
        inner
            .kv
            .delete(&[INDEX_KEY.to_string()])
            .map_err(SitedropError::Storage)?;
        Ok(())
    }

    /// Number of posts currently indexed.
    pub fn count(&self) -> Result<usize> {
        Ok(self.read_index()?.len())
    }

    /// Register a callback invoked synchronously on every future `add`.
    ///
    /// The returned guard deregisters the callback when dropped. A callback
    /// that panics is contained and does not affect other subscribers or
    /// the add itself.
    pub fn subscribe(&self, callback: impl Fn(&Post) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Estimate storage usage from a bounded random sample of posts.
    pub fn stats(&self) -> Result<StoreStats> {
        let ids = self.read_index()?;
        let total_posts = ids.len();
        if total_posts == 0 {
            return Ok(StoreStats {
                total_posts: 0,
                used_bytes: 0,
                max_bytes: STORAGE_BUDGET_BYTES,
                used_percentage: 0,
                sampled: false,
                sample_size: 0,
            });
        }

        let sampled = total_posts > MAX_SAMPLE_SIZE;
        let sample: Vec<String> = if sampled {
            ids.choose_multiple(&mut rand::rng(), MAX_SAMPLE_SIZE)
                .cloned()
                .collect()
        } else {
            ids.clone()
        };

        let keys: Vec<String> = sample.iter().map(|id| post_key(id)).collect();
        let values = self
            .inner
            .kv
            .multi_get(&keys)
            .map_err(SitedropError::Storage)?;

        let sizes: Vec<u64> = values
            .into_iter()
            .flatten()
            .map(|bytes| bytes.len() as u64)
            .collect();
        let sample_size = sizes.len();

        let mut used_bytes = if sample_size > 0 {
            let average = sizes.iter().sum::<u64>() / sample_size as u64;
            average * total_posts as u64
        } else {
            total_posts as u64 * FALLBACK_POST_BYTES
        };
        used_bytes += serde_json::to_vec(&ids).map_err(SitedropError::Parse)?.len() as u64;
        used_bytes += total_posts as u64 * PER_KEY_OVERHEAD;

        let used_percentage = ((used_bytes * 100) / STORAGE_BUDGET_BYTES).min(100) as u8;

        Ok(StoreStats {
            total_posts,
            used_bytes,
            max_bytes: STORAGE_BUDGET_BYTES,
            used_percentage,
            sampled,
            sample_size,
        })
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self
            .inner
            .kv
            .get(INDEX_KEY)
            .map_err(SitedropError::Storage)?
        {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(SitedropError::Parse),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, ids: &[String]) -> Result<()> {
        let bytes = serde_json::to_vec(ids).map_err(SitedropError::Parse)?;
        self.inner
            .kv
            .set(INDEX_KEY, &bytes)
            .map_err(SitedropError::Storage)
    }

    /// Fetch posts one key at a time to bound any single engine request.
    fn fetch_posts(&self, ids: &[String]) -> Result<Vec<Post>> {
        let mut posts = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.kv.get(&post_key(id)) {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(post) => posts.push(post),
                    Err(err) => tracing::warn!("skipping undecodable post {id}: {err}"),
                },
                Ok(None) => {} // deleted under us; skip
                Err(err) => tracing::warn!("failed to fetch post {id}: {err}"),
            }
        }
        Ok(posts)
    }

    fn notify(&self, post: &Post) {
        let subscribers: Vec<(u64, SubscriberFn)> = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(post))).is_err() {
                tracing::warn!("subscriber {id} panicked while handling post {}", post.id);
            }
        }
    }
}

fn post_key(id: &str) -> String {
    format!("{POST_KEY_PREFIX}{id}")
}
