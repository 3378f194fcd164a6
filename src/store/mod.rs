//! Concurrent in-memory social graph and content store.
//!
//! Per-record state sits behind its own mutex so ordinary traffic (votes,
//! comments, follows) never contends on a global lock. The coarse `RwLock`
//! around each collection guards only insertion, removal, and
//! whole-collection enumeration; enumerators clone the `Arc`s and release
//! the lock before touching any record.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::domain::{Comment, PasswordDigest, PostId, RewardCursor, Vote, VoteValue, Wallet, WalletEntry};
use crate::error::{StoreError, StoreResult};
use crate::persist::{PersistedPost, PersistedState, PersistedUser};

const MIN_TAGS: usize = 1;
const MAX_TAGS: usize = 5;

// A poisoned lock means some thread panicked mid-update; the data is still
// structurally sound, so keep serving instead of cascading the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rlock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn wlock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A registered user. Nickname, password digest, and tags are immutable;
/// everything else lives behind the per-record mutex. The login flag is a
/// separate atomic so session transitions are compare-and-set, never racy.
pub struct UserRecord {
    nickname: String,
    password: PasswordDigest,
    tags: Vec<String>,
    logged_in: AtomicBool,
    state: Mutex<UserState>,
}

#[derive(Default)]
struct UserState {
    followers: BTreeSet<String>,
    following: BTreeSet<String>,
    authored: BTreeSet<PostId>,
    reposted: BTreeSet<PostId>,
    wallet: Wallet,
}

impl UserRecord {
    fn new(nickname: String, password: PasswordDigest, tags: Vec<String>) -> Self {
        Self {
            nickname,
            password,
            tags,
            logged_in: AtomicBool::new(false),
            state: Mutex::new(UserState::default()),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    fn try_login(&self) -> bool {
        self.logged_in
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn force_logout(&self) {
        self.logged_in.store(false, Ordering::Release);
    }
}

/// A published post. Identity and body are immutable; votes, comments,
/// reposters, and the reward bookkeeping live behind the per-record mutex.
pub struct PostRecord {
    id: PostId,
    author: String,
    title: String,
    content: String,
    state: Mutex<PostState>,
}

#[derive(Default)]
struct PostState {
    votes: Vec<Vote>,
    voters: HashSet<String>,
    comments: Vec<Comment>,
    reposters: HashSet<String>,
    iteration: u64,
    cursor: RewardCursor,
}

impl PostRecord {
    fn new(id: PostId, author: &str, title: &str, content: &str) -> Self {
        Self {
            id,
            author: author.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            state: Mutex::new(PostState::default()),
        }
    }

    pub fn id(&self) -> PostId {
        self.id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Hand the reward engine everything past the cursor and advance the
    /// cursor to the end of both lists, so no contribution is ever counted
    /// twice. Returns the new votes, new comments, and the number of cycles
    /// already credited to this post.
    pub(crate) fn drain_new_contributions(&self) -> (Vec<Vote>, Vec<Comment>, u64) {
        let mut state = lock(&self.state);
        let votes = state.votes[state.cursor.votes_seen..].to_vec();
        let comments = state.comments[state.cursor.comments_seen..].to_vec();
        state.cursor = RewardCursor {
            votes_seen: state.votes.len(),
            comments_seen: state.comments.len(),
        };
        (votes, comments, state.iteration)
    }

    /// Bump the credited-cycle counter. Called only after a cycle actually
    /// credited this post.
    pub(crate) fn mark_rewarded(&self) {
        lock(&self.state).iteration += 1;
    }
}

/// Flat view of a post used by listing replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub id: PostId,
    pub author: String,
    pub title: String,
}

impl PostSummary {
    fn of(post: &PostRecord) -> Self {
        Self {
            id: post.id,
            author: post.author.clone(),
            title: post.title.clone(),
        }
    }
}

/// Ledger snapshot with its running total.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletView {
    pub entries: Vec<WalletEntry>,
    pub total: f64,
}

pub struct Store {
    users: RwLock<HashMap<String, Arc<UserRecord>>>,
    posts: RwLock<HashMap<PostId, Arc<PostRecord>>>,
    next_post_id: AtomicU64,
    hash_cost: u32,
}

impl Store {
    pub fn new(hash_cost: u32) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            posts: RwLock::new(HashMap::new()),
            next_post_id: AtomicU64::new(1),
            hash_cost,
        }
    }

    fn user(&self, nickname: &str) -> StoreResult<Arc<UserRecord>> {
        rlock(&self.users)
            .get(nickname)
            .cloned()
            .ok_or(StoreError::UnknownUser)
    }

    fn post(&self, id: PostId) -> StoreResult<Arc<PostRecord>> {
        rlock(&self.posts)
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownPost)
    }

    /// Create a user with a freshly hashed password.
    pub fn register(&self, nickname: &str, password: &str, tags: &[String]) -> StoreResult<()> {
        // Check before hashing: bcrypt is deliberately slow and a duplicate
        // nickname doesn't deserve the work.
        if rlock(&self.users).contains_key(nickname) {
            return Err(StoreError::DuplicateUser);
        }
        let tags = normalize_tags(tags)?;
        let password = PasswordDigest::hash(password, self.hash_cost)
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut users = wlock(&self.users);
        if users.contains_key(nickname) {
            return Err(StoreError::DuplicateUser);
        }
        users.insert(
            nickname.to_string(),
            Arc::new(UserRecord::new(nickname.to_string(), password, tags)),
        );
        Ok(())
    }

    /// Transition `LoggedOut -> LoggedIn`. A wrong password never touches
    /// session state; a concurrent second login loses the compare-and-set
    /// and fails deterministically.
    pub fn login(&self, nickname: &str, password: &str) -> StoreResult<()> {
        let user = self.user(nickname).map_err(|_| StoreError::WrongCredential)?;
        if !user.password.verify(password) {
            return Err(StoreError::WrongCredential);
        }
        if !user.try_login() {
            return Err(StoreError::AlreadyLogged);
        }
        Ok(())
    }

    /// No-op success when the user is already logged out.
    pub fn logout(&self, nickname: &str) -> StoreResult<()> {
        self.user(nickname)?.force_logout();
        Ok(())
    }

    /// Idempotent membership change. Returns whether the edge was actually
    /// added, which drives notification emission.
    pub fn follow(&self, follower: &str, followee: &str) -> StoreResult<bool> {
        if follower == followee {
            return Err(StoreError::SameUser);
        }
        let (from, to) = (self.user(follower)?, self.user(followee)?);
        // One record locked at a time; never both at once.
        let changed = lock(&from.state).following.insert(followee.to_string());
        if changed {
            lock(&to.state).followers.insert(follower.to_string());
        }
        Ok(changed)
    }

    pub fn unfollow(&self, follower: &str, followee: &str) -> StoreResult<bool> {
        if follower == followee {
            return Err(StoreError::SameUser);
        }
        let (from, to) = (self.user(follower)?, self.user(followee)?);
        let changed = lock(&from.state).following.remove(followee);
        if changed {
            lock(&to.state).followers.remove(follower);
        }
        Ok(changed)
    }

    /// Allocate the next post ID and publish the post under it.
    pub fn create_post(&self, author: &str, title: &str, content: &str) -> StoreResult<PostId> {
        let record = self.user(author)?;
        let id = self.next_post_id.fetch_add(1, Ordering::Relaxed);
        let post = Arc::new(PostRecord::new(id, author, title, content));
        if wlock(&self.posts).insert(id, post).is_some() {
            tracing::error!(id, "post id collision");
            return Err(StoreError::Internal(format!("post id {id} already taken")));
        }
        lock(&record.state).authored.insert(id);
        Ok(id)
    }

    /// Insert-if-absent vote registration: of any number of concurrent votes
    /// from the same user, exactly one lands and the rest fail.
    pub fn vote(&self, user: &str, post_id: PostId, value: VoteValue) -> StoreResult<()> {
        let post = self.post(post_id)?;
        if post.author == user {
            return Err(StoreError::SameUser);
        }
        self.user(user)?;
        let mut state = lock(&post.state);
        if !state.voters.insert(user.to_string()) {
            return Err(StoreError::DuplicateVote);
        }
        state.votes.push(Vote {
            voter: user.to_string(),
            value,
        });
        Ok(())
    }

    /// Append-only; any number of comments per user.
    pub fn comment(&self, user: &str, post_id: PostId, text: &str) -> StoreResult<()> {
        let post = self.post(post_id)?;
        if post.author == user {
            return Err(StoreError::SameUser);
        }
        self.user(user)?;
        lock(&post.state).comments.push(Comment {
            author: user.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    pub fn repost(&self, user: &str, post_id: PostId) -> StoreResult<()> {
        let post = self.post(post_id)?;
        if post.author == user {
            return Err(StoreError::SameUser);
        }
        let record = self.user(user)?;
        if !lock(&post.state).reposters.insert(user.to_string()) {
            return Err(StoreError::DuplicateRepost);
        }
        lock(&record.state).reposted.insert(post_id);
        Ok(())
    }

    /// Remove a post. Repost references held by other users go stale and are
    /// skipped by later feed lookups; the post itself is gone immediately.
    pub fn delete_post(&self, user: &str, post_id: PostId) -> StoreResult<()> {
        {
            let mut posts = wlock(&self.posts);
            let post = posts.get(&post_id).ok_or(StoreError::UnknownPost)?;
            if post.author != user {
                return Err(StoreError::NotOwner);
            }
            posts.remove(&post_id);
        }
        if let Ok(record) = self.user(user) {
            lock(&record.state).authored.remove(&post_id);
        }
        Ok(())
    }

    /// All non-own posts authored or reposted by users `user` follows.
    /// Computed on every call, deduplicated, ascending post ID.
    pub fn feed(&self, user: &str) -> StoreResult<Vec<PostSummary>> {
        let record = self.user(user)?;
        let following: Vec<String> = lock(&record.state).following.iter().cloned().collect();

        let mut ids = BTreeSet::new();
        for followee in &following {
            let Some(followed) = rlock(&self.users).get(followee).cloned() else {
                continue;
            };
            let state = lock(&followed.state);
            ids.extend(state.authored.iter().copied());
            ids.extend(state.reposted.iter().copied());
        }

        let posts = rlock(&self.posts);
        Ok(ids
            .into_iter()
            .filter_map(|id| posts.get(&id))
            .filter(|post| post.author != user)
            .map(|post| PostSummary::of(post))
            .collect())
    }

    /// Posts authored by `user`, ascending post ID.
    pub fn blog(&self, user: &str) -> StoreResult<Vec<PostSummary>> {
        let record = self.user(user)?;
        let authored: Vec<PostId> = lock(&record.state).authored.iter().copied().collect();
        let posts = rlock(&self.posts);
        Ok(authored
            .into_iter()
            .filter_map(|id| posts.get(&id))
            .map(|post| PostSummary::of(post))
            .collect())
    }

    pub fn wallet(&self, user: &str) -> StoreResult<WalletView> {
        let record = self.user(user)?;
        let state = lock(&record.state);
        Ok(WalletView {
            entries: state.wallet.entries().to_vec(),
            total: state.wallet.total(),
        })
    }

    pub fn followers(&self, user: &str) -> StoreResult<Vec<String>> {
        let record = self.user(user)?;
        let state = lock(&record.state);
        Ok(state.followers.iter().cloned().collect())
    }

    pub fn following(&self, user: &str) -> StoreResult<Vec<String>> {
        let record = self.user(user)?;
        let state = lock(&record.state);
        Ok(state.following.iter().cloned().collect())
    }

    /// Users sharing at least one tag with `user`. Tags are immutable, so
    /// the enumeration touches no per-record lock.
    pub fn discover(&self, user: &str) -> StoreResult<Vec<String>> {
        let me = self.user(user)?;
        let users = rlock(&self.users);
        let mut matches: Vec<String> = users
            .values()
            .filter(|r| r.nickname != me.nickname)
            .filter(|r| r.tags.iter().any(|t| me.tags.contains(t)))
            .map(|r| r.nickname.clone())
            .collect();
        matches.sort();
        Ok(matches)
    }

    /// Reward engine's wallet append.
    pub fn credit(&self, user: &str, amount: f64, timestamp: DateTime<Utc>) -> StoreResult<()> {
        let record = self.user(user)?;
        lock(&record.state).wallet.credit(amount, timestamp);
        Ok(())
    }

    /// Stable enumeration for background sweeps: clone the `Arc`s under the
    /// coarse read lock and release it before any per-post work happens.
    pub fn posts_snapshot(&self) -> Vec<Arc<PostRecord>> {
        let mut posts: Vec<Arc<PostRecord>> = rlock(&self.posts).values().cloned().collect();
        posts.sort_by_key(|p| p.id);
        posts
    }

    pub fn user_count(&self) -> usize {
        rlock(&self.users).len()
    }

    pub fn post_count(&self) -> usize {
        rlock(&self.posts).len()
    }

    /// Serializable view of everything for the persistence boundary.
    /// Session state is deliberately not part of it; sessions die with the
    /// process.
    pub fn snapshot_all(&self) -> PersistedState {
        let user_records: Vec<Arc<UserRecord>> = rlock(&self.users).values().cloned().collect();
        let post_records = self.posts_snapshot();

        let mut users: Vec<PersistedUser> = user_records
            .iter()
            .map(|record| {
                let state = lock(&record.state);
                PersistedUser {
                    nickname: record.nickname.clone(),
                    password_hash: record.password.as_str().to_string(),
                    tags: record.tags.clone(),
                    followers: state.followers.iter().cloned().collect(),
                    following: state.following.iter().cloned().collect(),
                    authored: state.authored.iter().copied().collect(),
                    reposted: state.reposted.iter().copied().collect(),
                    wallet: state.wallet.entries().to_vec(),
                }
            })
            .collect();
        users.sort_by(|a, b| a.nickname.cmp(&b.nickname));

        let posts = post_records
            .iter()
            .map(|record| {
                let state = lock(&record.state);
                PersistedPost {
                    id: record.id,
                    author: record.author.clone(),
                    title: record.title.clone(),
                    content: record.content.clone(),
                    votes: state.votes.clone(),
                    comments: state.comments.clone(),
                    reposters: state.reposters.iter().cloned().collect(),
                    iteration: state.iteration,
                    cursor: state.cursor,
                }
            })
            .collect();

        PersistedState { users, posts }
    }

    /// Rebuild a store from a persisted snapshot. Every user comes back
    /// logged out; post ID allocation resumes past the highest seen ID.
    pub fn restore(snapshot: PersistedState, hash_cost: u32) -> Self {
        let store = Store::new(hash_cost);
        {
            let mut users = wlock(&store.users);
            for user in snapshot.users {
                let record = UserRecord::new(
                    user.nickname.clone(),
                    PasswordDigest::from_hash(user.password_hash),
                    user.tags,
                );
                {
                    let mut state = lock(&record.state);
                    state.followers = user.followers.into_iter().collect();
                    state.following = user.following.into_iter().collect();
                    state.authored = user.authored.into_iter().collect();
                    state.reposted = user.reposted.into_iter().collect();
                    let mut wallet = Wallet::default();
                    for entry in user.wallet {
                        wallet.credit(entry.amount, entry.timestamp);
                    }
                    state.wallet = wallet;
                }
                users.insert(user.nickname, Arc::new(record));
            }
        }
        {
            let mut posts = wlock(&store.posts);
            let mut max_id = 0;
            for post in snapshot.posts {
                max_id = max_id.max(post.id);
                let record = PostRecord::new(post.id, &post.author, &post.title, &post.content);
                {
                    let mut state = lock(&record.state);
                    state.voters = post.votes.iter().map(|v| v.voter.clone()).collect();
                    state.votes = post.votes;
                    state.comments = post.comments;
                    state.reposters = post.reposters.into_iter().collect();
                    state.iteration = post.iteration;
                    state.cursor = post.cursor;
                }
                posts.insert(post.id, Arc::new(record));
            }
            store.next_post_id.store(max_id + 1, Ordering::Relaxed);
        }
        store
    }
}

fn normalize_tags(tags: &[String]) -> StoreResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.clone()) {
            normalized.push(tag);
        }
    }
    if normalized.len() < MIN_TAGS || normalized.len() > MAX_TAGS {
        return Err(StoreError::InvalidTags);
    }
    Ok(normalized)
}
