//! Persistence boundary: a JSON snapshot loaded at startup and rewritten
//! periodically (and on shutdown) by a background task. The snapshot is a
//! plain serializable view; the store owns the conversion in both
//! directions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::domain::{Comment, PostId, RewardCursor, Vote, WalletEntry};
use crate::store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub users: Vec<PersistedUser>,
    pub posts: Vec<PersistedPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedUser {
    pub nickname: String,
    pub password_hash: String,
    pub tags: Vec<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub authored: Vec<PostId>,
    pub reposted: Vec<PostId>,
    pub wallet: Vec<WalletEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPost {
    pub id: PostId,
    pub author: String,
    pub title: String,
    pub content: String,
    pub votes: Vec<Vote>,
    pub comments: Vec<Comment>,
    pub reposters: Vec<String>,
    pub iteration: u64,
    pub cursor: RewardCursor,
}

/// Load the snapshot if one exists. A missing file is a fresh start, not an
/// error.
pub fn load(path: &Path) -> Result<Option<PersistedState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let state = serde_json::from_str(&content)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    Ok(Some(state))
}

/// Write the snapshot via a temp file and rename, so a crash mid-write never
/// leaves a torn snapshot behind.
pub fn write_atomic(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(state)?;
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Periodic snapshot writer. A failed write is logged and retried on the
/// next tick; a final snapshot is taken on shutdown.
pub async fn run_snapshot_writer(
    store: Arc<Store>,
    path: PathBuf,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = store.snapshot_all();
                match write_atomic(&path, &state) {
                    Ok(()) => tracing::debug!(
                        path = %path.display(),
                        users = state.users.len(),
                        posts = state.posts.len(),
                        "snapshot written"
                    ),
                    Err(err) => tracing::warn!(%err, "snapshot write failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    if let Err(err) = write_atomic(&path, &store.snapshot_all()) {
        tracing::warn!(%err, "final snapshot failed");
    } else {
        tracing::info!(path = %path.display(), "final snapshot written");
    }
}
