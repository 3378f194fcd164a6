// Domain types - pure data and invariants, no I/O

mod post;
mod user;

pub use post::{Comment, PostId, RewardCursor, Vote, VoteValue};
pub use user::{PasswordDigest, Wallet, WalletEntry};
