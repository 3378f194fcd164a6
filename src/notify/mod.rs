//! Follow-event callbacks and the reward-cycle beacon.
//!
//! Each logged-in session registers an event channel at login; follow and
//! unfollow events are pushed there best-effort. Reward-cycle completion
//! goes out on a separate unreliable UDP transport as a fixed marker, never
//! acknowledged.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::store::Store;

/// Fixed payload of the "rewards updated" datagram.
pub const REWARD_MARKER: &[u8; 8] = b"REWARDS\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    Followed { follower: String },
    Unfollowed { follower: String },
}

impl FollowEvent {
    /// Wire form pushed on the session's callback channel.
    pub fn encode(&self) -> String {
        match self {
            Self::Followed { follower } => format!("FOLLOW;{follower};"),
            Self::Unfollowed { follower } => format!("UNFOLLOW;{follower};"),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<FollowEvent>;

pub struct NotificationService {
    store: Arc<Store>,
    channels: Mutex<HashMap<String, EventSender>>,
    beacon: Option<UdpSocket>,
    beacon_target: SocketAddr,
}

impl NotificationService {
    pub fn new(store: Arc<Store>, beacon_target: SocketAddr) -> Self {
        let beacon = match UdpSocket::bind(("0.0.0.0", 0)) {
            Ok(socket) => {
                let _ = socket.set_nonblocking(true);
                Some(socket)
            }
            Err(err) => {
                tracing::warn!(%err, "reward beacon disabled: could not bind UDP socket");
                None
            }
        };
        Self {
            store,
            channels: Mutex::new(HashMap::new()),
            beacon,
            beacon_target,
        }
    }

    /// Register a session's callback channel. Returns the current follower
    /// set so the client can seed its local state.
    pub fn subscribe(&self, user: &str, sender: EventSender) -> Vec<String> {
        self.channels().insert(user.to_string(), sender);
        self.store.followers(user).unwrap_or_default()
    }

    /// Idempotent; unsubscribing a user that never subscribed is fine.
    pub fn unsubscribe(&self, user: &str) -> bool {
        self.channels().remove(user).is_some()
    }

    pub fn notify_follow(&self, target: &str, follower: &str) {
        self.push(
            target,
            FollowEvent::Followed {
                follower: follower.to_string(),
            },
        );
    }

    pub fn notify_unfollow(&self, target: &str, follower: &str) {
        self.push(
            target,
            FollowEvent::Unfollowed {
                follower: follower.to_string(),
            },
        );
    }

    // Best-effort: the graph mutation already committed, so a failed
    // delivery is dropped, never rolled back.
    fn push(&self, target: &str, event: FollowEvent) {
        let mut channels = self.channels();
        let Some(sender) = channels.get(target) else {
            return;
        };
        if sender.send(event).is_err() {
            // Receiver is gone; the session died without unsubscribing.
            channels.remove(target);
        }
    }

    /// Fire the content-free "rewards updated" marker. Clients that miss it
    /// simply query their wallet later.
    pub fn broadcast_reward_cycle(&self) {
        let Some(socket) = &self.beacon else {
            return;
        };
        if let Err(err) = socket.send_to(REWARD_MARKER, self.beacon_target) {
            tracing::debug!(%err, "reward beacon send failed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels().len()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, EventSender>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
