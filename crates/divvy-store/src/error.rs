use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payout not found: {0}")]
    PayoutNotFound(Uuid),

    #[error("state file inconsistent: payout key {key} points at missing row {id}")]
    DanglingPayoutKey { key: String, id: Uuid },

    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file corrupt: {0}")]
    Json(#[from] serde_json::Error),
}
