use thiserror::Error;

use super::FIELD_SEP;

/// Every operation a client can issue. The wire name is the screaming-snake
/// form of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Login,
    Logout,
    Follow,
    Unfollow,
    CreatePost,
    Vote,
    Comment,
    Repost,
    DeletePost,
    Feed,
    Blog,
    Wallet,
    Followers,
    Following,
    Discover,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "REGISTER" => Some(Self::Register),
            "LOGIN" => Some(Self::Login),
            "LOGOUT" => Some(Self::Logout),
            "FOLLOW" => Some(Self::Follow),
            "UNFOLLOW" => Some(Self::Unfollow),
            "CREATE_POST" => Some(Self::CreatePost),
            "VOTE" => Some(Self::Vote),
            "COMMENT" => Some(Self::Comment),
            "REPOST" => Some(Self::Repost),
            "DELETE_POST" => Some(Self::DeletePost),
            "FEED" => Some(Self::Feed),
            "BLOG" => Some(Self::Blog),
            "WALLET" => Some(Self::Wallet),
            "FOLLOWERS" => Some(Self::Followers),
            "FOLLOWING" => Some(Self::Following),
            "DISCOVER" => Some(Self::Discover),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Follow => "FOLLOW",
            Self::Unfollow => "UNFOLLOW",
            Self::CreatePost => "CREATE_POST",
            Self::Vote => "VOTE",
            Self::Comment => "COMMENT",
            Self::Repost => "REPOST",
            Self::DeletePost => "DELETE_POST",
            Self::Feed => "FEED",
            Self::Blog => "BLOG",
            Self::Wallet => "WALLET",
            Self::Followers => "FOLLOWERS",
            Self::Following => "FOLLOWING",
            Self::Discover => "DISCOVER",
        }
    }

    /// Everything except registration and login runs inside a session.
    pub fn requires_login(self) -> bool {
        !matches!(self, Self::Register | Self::Login)
    }
}

/// A decoded request: operation, acting user, operation-specific arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub user: String,
    pub args: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unsupported operation {0:?}")]
    Unsupported(String),

    #[error("{0}")]
    Malformed(&'static str),
}

impl Request {
    pub fn decode(payload: &str) -> Result<Self, RequestError> {
        let mut fields = payload.split(FIELD_SEP);
        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(RequestError::Malformed("missing operation name"));
        }
        let operation =
            Operation::parse(name).ok_or_else(|| RequestError::Unsupported(name.to_string()))?;
        let user = fields
            .next()
            .ok_or(RequestError::Malformed("missing acting user"))?;
        if user.is_empty() {
            return Err(RequestError::Malformed("empty acting user"));
        }
        Ok(Self {
            operation,
            user: user.to_string(),
            args: fields.map(str::to_string).collect(),
        })
    }

    /// Client-side encoding; the tests speak the protocol through this.
    pub fn encode(operation: Operation, user: &str, args: &[&str]) -> String {
        let mut out = String::from(operation.name());
        out.push(FIELD_SEP);
        out.push_str(user);
        for arg in args {
            out.push(FIELD_SEP);
            out.push_str(arg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_roundtrips_encode() {
        let wire = Request::encode(Operation::CreatePost, "alice", &["Title", "Body text"]);
        let request = Request::decode(&wire).unwrap();
        assert_eq!(request.operation, Operation::CreatePost);
        assert_eq!(request.user, "alice");
        assert_eq!(request.args, vec!["Title", "Body text"]);
    }

    #[test]
    fn decode_accepts_operations_without_arguments() {
        let request = Request::decode(&Request::encode(Operation::Feed, "alice", &[])).unwrap();
        assert_eq!(request.operation, Operation::Feed);
        assert!(request.args.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_operation() {
        let err = Request::decode("SHOUT\u{1f}alice").unwrap_err();
        assert_eq!(err, RequestError::Unsupported("SHOUT".to_string()));
    }

    #[test]
    fn decode_rejects_missing_or_empty_user() {
        assert!(matches!(
            Request::decode("FEED"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            Request::decode("FEED\u{1f}"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            Request::decode(""),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn every_operation_name_parses_back() {
        for op in [
            Operation::Register,
            Operation::Login,
            Operation::Logout,
            Operation::Follow,
            Operation::Unfollow,
            Operation::CreatePost,
            Operation::Vote,
            Operation::Comment,
            Operation::Repost,
            Operation::DeletePost,
            Operation::Feed,
            Operation::Blog,
            Operation::Wallet,
            Operation::Followers,
            Operation::Following,
            Operation::Discover,
        ] {
            assert_eq!(Operation::parse(op.name()), Some(op));
        }
    }

    #[test]
    fn only_register_and_login_skip_the_session_check() {
        assert!(!Operation::Register.requires_login());
        assert!(!Operation::Login.requires_login());
        assert!(Operation::Logout.requires_login());
        assert!(Operation::Vote.requires_login());
        assert!(Operation::Wallet.requires_login());
    }
}
