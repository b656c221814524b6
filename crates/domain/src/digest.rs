//! Daily digests produced by the sleep cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One digest per `(user_id, date)`: top unresolved conflicts, proposed
/// consolidations awaiting review, and recent high-strength scene
/// highlights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyDigest {
    pub id: String,
    pub user_id: String,
    /// `YYYY-MM-DD`.
    pub digest_date: String,
    pub payload: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}
