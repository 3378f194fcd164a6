use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bcrypt digest of a user's password. Stores the hash, never the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    /// Hash a plaintext password with the given bcrypt cost.
    pub fn hash(plaintext: &str, cost: u32) -> Result<Self, bcrypt::BcryptError> {
        Ok(Self(bcrypt::hash(plaintext, cost)?))
    }

    /// Rebuild a digest from an already-hashed value (snapshot restore).
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Verify a plaintext password against the stored hash.
    pub fn verify(&self, plaintext: &str) -> bool {
        bcrypt::verify(plaintext, &self.0).unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One credited amount in a user's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
}

/// Ordered ledger of reward credits. Amounts are always positive, so the
/// running total never decreases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    entries: Vec<WalletEntry>,
}

impl Wallet {
    /// Append a credit to the ledger. Non-positive and non-finite amounts are
    /// ignored; the ledger only ever grows.
    pub fn credit(&mut self, amount: f64, timestamp: DateTime<Utc>) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        self.entries.push(WalletEntry { timestamp, amount });
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn entries(&self) -> &[WalletEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
