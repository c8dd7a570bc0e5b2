use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::TargetId;

/// One recorded price of one target at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PriceObservation {
    pub id: i64,
    pub target_id: TargetId,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}
