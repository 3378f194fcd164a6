use serde::{Deserialize, Serialize};

/// Unique, monotonically allocated post identifier. Never reused.
pub type PostId = u64;

/// A vote is either an upvote or a downvote, immutable once cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    /// Parse the wire representation. Only the explicit forms are accepted.
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "+1" => Some(Self::Up),
            "-1" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn score(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: String,
    pub value: VoteValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
}

/// Marks the prefix of a post's vote and comment lists that has already been
/// counted by past reward cycles. Both indices only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCursor {
    pub votes_seen: usize,
    pub comments_seen: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_value_parses_only_explicit_forms() {
        assert_eq!(VoteValue::parse("+1"), Some(VoteValue::Up));
        assert_eq!(VoteValue::parse("-1"), Some(VoteValue::Down));
        assert_eq!(VoteValue::parse("1"), None);
        assert_eq!(VoteValue::parse("0"), None);
        assert_eq!(VoteValue::parse("up"), None);
    }

    #[test]
    fn vote_scores() {
        assert_eq!(VoteValue::Up.score(), 1);
        assert_eq!(VoteValue::Down.score(), -1);
    }
}
