use crate::error::StoreError;

use super::FIELD_SEP;

/// Status taxonomy returned to clients. Domain-rule violations are ordinary
/// replies, never connection-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    WrongCredential,
    AlreadyLogged,
    NotLogged,
    SameUser,
    DuplicateVote,
    DuplicateRepost,
    NotOwner,
    UnknownUser,
    UnknownPost,
    EmptySet,
    OperationNotSupported,
    InvalidArgument,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::WrongCredential => "WRONG_CREDENTIAL",
            Self::AlreadyLogged => "ALREADY_LOGGED",
            Self::NotLogged => "NOT_LOGGED",
            Self::SameUser => "SAME_USER",
            Self::DuplicateVote => "DUPLICATE_VOTE",
            Self::DuplicateRepost => "DUPLICATE_REPOST",
            Self::NotOwner => "NOT_OWNER",
            Self::UnknownUser => "UNKNOWN_USER",
            Self::UnknownPost => "UNKNOWN_POST",
            Self::EmptySet => "EMPTY_SET",
            Self::OperationNotSupported => "OPERATION_NOT_SUPPORTED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "WRONG_CREDENTIAL" => Some(Self::WrongCredential),
            "ALREADY_LOGGED" => Some(Self::AlreadyLogged),
            "NOT_LOGGED" => Some(Self::NotLogged),
            "SAME_USER" => Some(Self::SameUser),
            "DUPLICATE_VOTE" => Some(Self::DuplicateVote),
            "DUPLICATE_REPOST" => Some(Self::DuplicateRepost),
            "NOT_OWNER" => Some(Self::NotOwner),
            "UNKNOWN_USER" => Some(Self::UnknownUser),
            "UNKNOWN_POST" => Some(Self::UnknownPost),
            "EMPTY_SET" => Some(Self::EmptySet),
            "OPERATION_NOT_SUPPORTED" => Some(Self::OperationNotSupported),
            "INVALID_ARGUMENT" => Some(Self::InvalidArgument),
            _ => None,
        }
    }
}

impl From<&StoreError> for Status {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::DuplicateUser => Status::Failure,
            StoreError::InvalidTags => Status::InvalidArgument,
            StoreError::WrongCredential => Status::WrongCredential,
            StoreError::AlreadyLogged => Status::AlreadyLogged,
            StoreError::NotLogged => Status::NotLogged,
            StoreError::SameUser => Status::SameUser,
            StoreError::DuplicateVote => Status::DuplicateVote,
            StoreError::DuplicateRepost => Status::DuplicateRepost,
            StoreError::NotOwner => Status::NotOwner,
            StoreError::UnknownUser => Status::UnknownUser,
            StoreError::UnknownPost => Status::UnknownPost,
            StoreError::Internal(_) => Status::Failure,
        }
    }
}

/// One framed reply: status, human-readable description, operation-specific
/// data (comma-delimited lists, `key=value` lines for wallets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub description: String,
    pub data: String,
}

impl Reply {
    pub fn new(status: Status, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            data: String::new(),
        }
    }

    pub fn ok(description: impl Into<String>) -> Self {
        Self::new(Status::Success, description)
    }

    pub fn with_data(description: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            description: description.into(),
            data: data.into(),
        }
    }

    pub fn empty_set(description: impl Into<String>) -> Self {
        Self::new(Status::EmptySet, description)
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{FIELD_SEP}{}{FIELD_SEP}{}",
            self.status.as_str(),
            self.description,
            self.data
        )
    }

    /// Client-side decoding; data keeps any remaining separators intact.
    pub fn decode(payload: &str) -> Option<Self> {
        let mut fields = payload.splitn(3, FIELD_SEP);
        let status = Status::parse(fields.next()?)?;
        let description = fields.next()?.to_string();
        let data = fields.next().unwrap_or_default().to_string();
        Some(Self {
            status,
            description,
            data,
        })
    }
}

impl From<&StoreError> for Reply {
    fn from(err: &StoreError) -> Self {
        Reply::new(err.into(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let reply = Reply::with_data("post created", "42");
        let decoded = Reply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn decode_tolerates_empty_data_field() {
        let decoded = Reply::decode("SUCCESS\u{1f}done\u{1f}").unwrap();
        assert_eq!(decoded.status, Status::Success);
        assert_eq!(decoded.description, "done");
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_status() {
        assert!(Reply::decode("MAYBE\u{1f}hm\u{1f}").is_none());
    }

    #[test]
    fn every_status_parses_back() {
        for status in [
            Status::Success,
            Status::Failure,
            Status::WrongCredential,
            Status::AlreadyLogged,
            Status::NotLogged,
            Status::SameUser,
            Status::DuplicateVote,
            Status::DuplicateRepost,
            Status::NotOwner,
            Status::UnknownUser,
            Status::UnknownPost,
            Status::EmptySet,
            Status::OperationNotSupported,
            Status::InvalidArgument,
        ] {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        assert_eq!(Status::from(&StoreError::DuplicateVote), Status::DuplicateVote);
        assert_eq!(Status::from(&StoreError::SameUser), Status::SameUser);
        assert_eq!(
            Status::from(&StoreError::Internal("boom".to_string())),
            Status::Failure
        );
    }
}
