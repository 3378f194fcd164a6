use thiserror::Error;

/// Domain-rule outcomes surfaced by the store. These are expected results
/// translated into reply statuses, not process failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("nickname is already registered")]
    DuplicateUser,

    #[error("between 1 and 5 tags are required")]
    InvalidTags,

    #[error("wrong nickname or password")]
    WrongCredential,

    #[error("user already has an active session")]
    AlreadyLogged,

    #[error("user is not logged in")]
    NotLogged,

    #[error("operation cannot target the acting user")]
    SameUser,

    #[error("user has already voted on this post")]
    DuplicateVote,

    #[error("user has already reposted this post")]
    DuplicateRepost,

    #[error("only the author may delete a post")]
    NotOwner,

    #[error("unknown user")]
    UnknownUser,

    #[error("unknown post")]
    UnknownPost,

    #[error("internal store failure: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
