use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::{TargetId, UNSAVED_TARGET_ID};

/// One year.
pub const MAX_INTERVAL_MINUTES: i64 = 525_600;

/// One page element being watched for its price.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Validate)]
pub struct TrackedTarget {
    pub id: TargetId,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(url)]
    pub url: String,

    /// Tried as an XPath expression first, then as a CSS selector.
    #[validate(length(min = 1))]
    pub selector: String,

    /// Extraction regex. Empty means the configured default pattern.
    pub pattern: String,

    /// Minutes between two scheduled firings, at most one year.
    #[validate(range(min = 1, max = 525600))]
    pub update_interval: i64,

    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTarget {
    pub name: Option<String>,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub pattern: Option<String>,
    pub update_interval: Option<i64>,
    pub is_active: Option<bool>,
}

impl TrackedTarget {
    /// Builds a target that only exists in memory until its first successful
    /// extraction commits it.
    pub fn unsaved(
        name: impl Into<String>,
        url: impl Into<String>,
        selector: impl Into<String>,
        pattern: impl Into<String>,
        update_interval: i64,
    ) -> Self {
        Self {
            id: UNSAVED_TARGET_ID,
            name: name.into(),
            url: url.into(),
            selector: selector.into(),
            pattern: pattern.into(),
            update_interval,
            is_active: true,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNSAVED_TARGET_ID
    }

    pub fn interval(&self) -> std::time::Duration {
        let minutes = self.update_interval.clamp(1, MAX_INTERVAL_MINUTES) as u64;
        std::time::Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn apply(&mut self, update: UpdateTarget) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(url) = update.url {
            self.url = url;
        }
        if let Some(selector) = update.selector {
            self.selector = selector;
        }
        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(update_interval) = update.update_interval {
            self.update_interval = update_interval;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
    }
}
