//! Periodic reward computation.
//!
//! Each cycle sweeps a stable snapshot of the posts, scores only the
//! contributions added since each post's cursor, credits the author and the
//! curators, and then signals completion on the notification beacon. A
//! failure on one post never aborts the rest of the sweep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::domain::{Comment, Vote, VoteValue};
use crate::notify::NotificationService;
use crate::store::Store;

/// Cadence and author/curator split of the engine.
#[derive(Debug, Clone, Copy)]
pub struct RewardPolicy {
    pub period: Duration,
    /// Fraction of each post reward credited to the author, in [0, 1].
    /// The remainder is split evenly across that cycle's curators.
    pub author_share: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub posts_seen: usize,
    pub posts_credited: usize,
    pub credits_failed: usize,
}

pub struct RewardEngine {
    store: Arc<Store>,
    notifications: Arc<NotificationService>,
    policy: RewardPolicy,
}

impl RewardEngine {
    pub fn new(
        store: Arc<Store>,
        notifications: Arc<NotificationService>,
        policy: RewardPolicy,
    ) -> Self {
        Self {
            store,
            notifications,
            policy,
        }
    }

    /// Drive cycles until shutdown. Client-facing traffic is never blocked:
    /// each sweep works off `Arc` clones and independent wallet credits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            time::interval_at(time::Instant::now() + self.policy.period, self.policy.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.run_cycle();
                    tracing::info!(
                        posts = stats.posts_seen,
                        credited = stats.posts_credited,
                        failed = stats.credits_failed,
                        "reward cycle complete"
                    );
                    self.notifications.broadcast_reward_cycle();
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One full sweep over the current posts. Public so tests and callers
    /// can run a cycle without the timer.
    pub fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();
        let now = Utc::now();
        for post in self.store.posts_snapshot() {
            stats.posts_seen += 1;
            // The cursor advances here even if the delta ends up at zero, so
            // the same contributions are never recounted next cycle.
            let (votes, comments, iteration) = post.drain_new_contributions();
            let Some(outcome) = evaluate(&votes, &comments) else {
                continue;
            };

            let reward = outcome.delta / (iteration + 1) as f64;
            post.mark_rewarded();
            stats.posts_credited += 1;

            let author_cut = reward * self.policy.author_share;
            if let Err(err) = self.store.credit(post.author(), author_cut, now) {
                stats.credits_failed += 1;
                tracing::warn!(post = post.id(), author = post.author(), %err, "author credit failed");
            }

            if outcome.curators.is_empty() {
                continue;
            }
            let share = reward * (1.0 - self.policy.author_share) / outcome.curators.len() as f64;
            for curator in outcome.curators.keys() {
                if let Err(err) = self.store.credit(curator, share, now) {
                    stats.credits_failed += 1;
                    tracing::warn!(post = post.id(), curator, %err, "curator credit failed");
                }
            }
        }
        stats
    }
}

struct CycleOutcome {
    delta: f64,
    /// Curator nickname -> number of comments they added this cycle.
    /// Vote-only curators sit at zero.
    curators: BTreeMap<String, u64>,
}

/// Score one post's fresh contributions. `None` means nothing to credit
/// this cycle.
fn evaluate(votes: &[Vote], comments: &[Comment]) -> Option<CycleOutcome> {
    let net: i64 = votes.iter().map(|v| v.value.score()).sum();
    let positive_net = net.max(0) as f64;

    let mut curators: BTreeMap<String, u64> = BTreeMap::new();
    for vote in votes {
        if vote.value == VoteValue::Up {
            curators.entry(vote.voter.clone()).or_insert(0);
        }
    }
    for comment in comments {
        *curators.entry(comment.author.clone()).or_insert(0) += 1;
    }

    let comment_term: f64 = curators
        .values()
        .map(|&count| (1.0 + count as f64).ln())
        .sum();
    let delta = (1.0 + positive_net).ln() + comment_term;
    if delta <= 0.0 {
        return None;
    }
    Some(CycleOutcome { delta, curators })
}
