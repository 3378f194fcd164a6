use std::sync::Arc;

use crate::domain::VoteValue;
use crate::notify::{EventSender, NotificationService};
use crate::proto::{Operation, Reply, Request, RequestError, Status};
use crate::store::{PostSummary, Store, WalletView};

/// Per-connection session: which user, if any, is logged in here, and the
/// channel follow events for that user are pushed through.
pub struct Session {
    user: Option<String>,
    events: EventSender,
}

impl Session {
    pub fn new(events: EventSender) -> Self {
        Self { user: None, events }
    }

    pub fn current_user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Translates decoded requests into store and notification calls. Holds no
/// locks of its own and performs no I/O; the reactor owns the wire.
pub struct Dispatcher {
    store: Arc<Store>,
    notifications: Arc<NotificationService>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, notifications: Arc<NotificationService>) -> Self {
        Self {
            store,
            notifications,
        }
    }

    pub fn handle(&self, session: &mut Session, payload: &str) -> Reply {
        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(RequestError::Unsupported(name)) => {
                return Reply::new(
                    Status::OperationNotSupported,
                    format!("unknown operation {name}"),
                )
            }
            Err(RequestError::Malformed(what)) => {
                return Reply::new(Status::InvalidArgument, what)
            }
        };

        // Every operation past registration and login acts as the session's
        // logged-in user; a mismatched acting user is the same as not being
        // logged in at all.
        if request.operation.requires_login()
            && session.current_user() != Some(request.user.as_str())
        {
            return Reply::new(Status::NotLogged, "log in first");
        }

        match request.operation {
            Operation::Register => self.register(&request),
            Operation::Login => self.login(session, &request),
            Operation::Logout => self.logout(session, &request),
            Operation::Follow => self.follow(&request),
            Operation::Unfollow => self.unfollow(&request),
            Operation::CreatePost => self.create_post(&request),
            Operation::Vote => self.vote(&request),
            Operation::Comment => self.comment(&request),
            Operation::Repost => self.repost(&request),
            Operation::DeletePost => self.delete_post(&request),
            Operation::Feed => self.feed(&request),
            Operation::Blog => self.blog(&request),
            Operation::Wallet => self.wallet(&request),
            Operation::Followers => self.followers(&request),
            Operation::Following => self.following(&request),
            Operation::Discover => self.discover(&request),
        }
    }

    /// Connection teardown: release the session if the client never logged
    /// out. Unsubscribe first so no event lands after the slot frees up.
    pub fn hangup(&self, session: &mut Session) {
        if let Some(user) = session.user.take() {
            self.notifications.unsubscribe(&user);
            if let Err(err) = self.store.logout(&user) {
                tracing::warn!(%user, %err, "logout on hangup failed");
            }
            tracing::debug!(%user, "session released on disconnect");
        }
    }

    fn register(&self, request: &Request) -> Reply {
        let [password, tags @ ..] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "missing password");
        };
        match self.store.register(&request.user, password, tags) {
            Ok(()) => Reply::ok("user registered"),
            Err(err) => Reply::from(&err),
        }
    }

    fn login(&self, session: &mut Session, request: &Request) -> Reply {
        let [password] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected exactly one password");
        };
        if session.user.is_some() {
            return Reply::new(
                Status::AlreadyLogged,
                "this connection already has a session",
            );
        }
        match self.store.login(&request.user, password) {
            Ok(()) => {
                session.user = Some(request.user.clone());
                let followers = self
                    .notifications
                    .subscribe(&request.user, session.events.clone());
                Reply::with_data("logged in", followers.join(","))
            }
            Err(err) => Reply::from(&err),
        }
    }

    fn logout(&self, session: &mut Session, request: &Request) -> Reply {
        if !request.args.is_empty() {
            return Reply::new(Status::InvalidArgument, "unexpected arguments");
        }
        self.notifications.unsubscribe(&request.user);
        if let Err(err) = self.store.logout(&request.user) {
            return Reply::from(&err);
        }
        session.user = None;
        Reply::ok("logged out")
    }

    fn follow(&self, request: &Request) -> Reply {
        let [target] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected exactly one target user");
        };
        match self.store.follow(&request.user, target) {
            // Notify only after the mutation committed, and only when the
            // edge actually changed.
            Ok(true) => {
                self.notifications.notify_follow(target, &request.user);
                Reply::ok(format!("now following {target}"))
            }
            Ok(false) => Reply::ok(format!("already following {target}")),
            Err(err) => Reply::from(&err),
        }
    }

    fn unfollow(&self, request: &Request) -> Reply {
        let [target] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected exactly one target user");
        };
        match self.store.unfollow(&request.user, target) {
            Ok(true) => {
                self.notifications.notify_unfollow(target, &request.user);
                Reply::ok(format!("no longer following {target}"))
            }
            Ok(false) => Reply::ok(format!("was not following {target}")),
            Err(err) => Reply::from(&err),
        }
    }

    fn create_post(&self, request: &Request) -> Reply {
        let [title, content] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected title and content");
        };
        if title.is_empty() || content.is_empty() {
            return Reply::new(Status::InvalidArgument, "title and content must be non-empty");
        }
        match self.store.create_post(&request.user, title, content) {
            Ok(id) => Reply::with_data("post created", id.to_string()),
            Err(err) => Reply::from(&err),
        }
    }

    fn vote(&self, request: &Request) -> Reply {
        let [post, value] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected post id and vote value");
        };
        let Some(post) = parse_post_id(post) else {
            return Reply::new(Status::InvalidArgument, "post id must be numeric");
        };
        let Some(value) = VoteValue::parse(value) else {
            return Reply::new(Status::InvalidArgument, "vote must be +1 or -1");
        };
        match self.store.vote(&request.user, post, value) {
            Ok(()) => Reply::ok("vote recorded"),
            Err(err) => Reply::from(&err),
        }
    }

    fn comment(&self, request: &Request) -> Reply {
        let [post, text] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected post id and comment text");
        };
        let Some(post) = parse_post_id(post) else {
            return Reply::new(Status::InvalidArgument, "post id must be numeric");
        };
        if text.is_empty() {
            return Reply::new(Status::InvalidArgument, "comment text must be non-empty");
        }
        match self.store.comment(&request.user, post, text) {
            Ok(()) => Reply::ok("comment added"),
            Err(err) => Reply::from(&err),
        }
    }

    fn repost(&self, request: &Request) -> Reply {
        let [post] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected exactly one post id");
        };
        let Some(post) = parse_post_id(post) else {
            return Reply::new(Status::InvalidArgument, "post id must be numeric");
        };
        match self.store.repost(&request.user, post) {
            Ok(()) => Reply::ok("reposted"),
            Err(err) => Reply::from(&err),
        }
    }

    fn delete_post(&self, request: &Request) -> Reply {
        let [post] = request.args.as_slice() else {
            return Reply::new(Status::InvalidArgument, "expected exactly one post id");
        };
        let Some(post) = parse_post_id(post) else {
            return Reply::new(Status::InvalidArgument, "post id must be numeric");
        };
        match self.store.delete_post(&request.user, post) {
            Ok(()) => Reply::ok("post deleted"),
            Err(err) => Reply::from(&err),
        }
    }

    fn feed(&self, request: &Request) -> Reply {
        match self.store.feed(&request.user) {
            Ok(posts) if posts.is_empty() => Reply::empty_set("feed is empty"),
            Ok(posts) => Reply::with_data("feed", encode_posts(&posts)),
            Err(err) => Reply::from(&err),
        }
    }

    fn blog(&self, request: &Request) -> Reply {
        match self.store.blog(&request.user) {
            Ok(posts) if posts.is_empty() => Reply::empty_set("no posts yet"),
            Ok(posts) => Reply::with_data("blog", encode_posts(&posts)),
            Err(err) => Reply::from(&err),
        }
    }

    fn wallet(&self, request: &Request) -> Reply {
        match self.store.wallet(&request.user) {
            Ok(wallet) => Reply::with_data("wallet", encode_wallet(&wallet)),
            Err(err) => Reply::from(&err),
        }
    }

    fn followers(&self, request: &Request) -> Reply {
        self.user_listing(self.store.followers(&request.user), "followers")
    }

    fn following(&self, request: &Request) -> Reply {
        self.user_listing(self.store.following(&request.user), "following")
    }

    fn discover(&self, request: &Request) -> Reply {
        self.user_listing(self.store.discover(&request.user), "users with shared tags")
    }

    fn user_listing(
        &self,
        result: Result<Vec<String>, crate::error::StoreError>,
        what: &str,
    ) -> Reply {
        match result {
            Ok(users) if users.is_empty() => Reply::empty_set(format!("no {what}")),
            Ok(users) => Reply::with_data(what, users.join(",")),
            Err(err) => Reply::from(&err),
        }
    }
}

fn parse_post_id(field: &str) -> Option<u64> {
    field.parse().ok()
}

fn encode_posts(posts: &[PostSummary]) -> String {
    posts
        .iter()
        .map(|p| format!("{}:{}:{}", p.id, p.author, p.title))
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_wallet(wallet: &WalletView) -> String {
    let mut lines = vec![format!("total={}", wallet.total)];
    lines.extend(
        wallet
            .entries
            .iter()
            .map(|e| format!("{}={}", e.timestamp.to_rfc3339(), e.amount)),
    );
    lines.join("\n")
}
