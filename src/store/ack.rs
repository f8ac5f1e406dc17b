//! Single-use acknowledgment tokens
//!
//! A confirmation gate mints a token when an action needs explicit user
//! approval. The client sends it back with the next request; the HTTP layer
//! redeems it here before building the pipeline context.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Outcome of presenting a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRedemption {
    /// Token accepted and consumed; carries the action it confirms
    Valid { action: String },
    Unknown,
    Expired,
    /// Token belongs to a different user; it stays redeemable by its owner
    WrongUser,
}

impl AckRedemption {
    pub fn is_valid(&self) -> bool {
        matches!(self, AckRedemption::Valid { .. })
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            AckRedemption::Valid { action } => Some(action),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingAck {
    user_id: String,
    action: String,
    issued_at: Instant,
}

/// In-memory ledger of outstanding acknowledgment tokens
pub struct AckLedger {
    pending: Mutex<HashMap<String, PendingAck>>,
    ttl: Duration,
}

impl AckLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token confirming `action` for `user_id`
    pub async fn issue(&self, user_id: &str, action: &str) -> String {
        let token = format!("ack_{}", Uuid::new_v4().simple());
        let mut pending = self.pending.lock().await;
        let ttl = self.ttl;
        pending.retain(|_, ack| ack.issued_at.elapsed() < ttl);
        pending.insert(
            token.clone(),
            PendingAck {
                user_id: user_id.to_string(),
                action: action.to_string(),
                issued_at: Instant::now(),
            },
        );
        debug!(user_id = %user_id, action = %action, "Issued acknowledgment token");
        token
    }

    /// Consume a token presented by `user_id`
    pub async fn redeem(&self, token: &str, user_id: &str) -> AckRedemption {
        let mut pending = self.pending.lock().await;
        let Some(ack) = pending.get(token) else {
            return AckRedemption::Unknown;
        };

        if ack.user_id != user_id {
            return AckRedemption::WrongUser;
        }
        if ack.issued_at.elapsed() >= self.ttl {
            pending.remove(token);
            return AckRedemption::Expired;
        }

        match pending.remove(token) {
            Some(ack) => AckRedemption::Valid { action: ack.action },
            None => AckRedemption::Unknown,
        }
    }

    pub async fn outstanding(&self) -> usize {
        self.pending.lock().await.len()
    }
}
