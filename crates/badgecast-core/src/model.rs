use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw badge figures as delivered by an upstream push or a fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeCount {
    pub count: u32,
    pub app_point: i64,
}

impl BadgeCount {
    pub fn new(count: u32, app_point: i64) -> Self {
        Self { count, app_point }
    }
}

/// Last known badge state.
///
/// Values are immutable: an update produces a new `BadgeModel` that
/// supersedes the previous one. The empty state is `Option::<BadgeModel>::None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeModel {
    count: u32,
    app_point: i64,
    timestamp: DateTime<Utc>,
}

impl BadgeModel {
    /// Build a model stamped with the current time.
    pub fn now(count: u32, app_point: i64) -> Self {
        Self::at(count, app_point, Utc::now())
    }

    pub fn at(count: u32, app_point: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            count,
            app_point,
            timestamp,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn app_point(&self) -> i64 {
        self.app_point
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the badge should be drawn at all.
    pub fn is_visible(&self) -> bool {
        self.count > 0
    }

    pub fn as_count(&self) -> BadgeCount {
        BadgeCount::new(self.count, self.app_point)
    }
}

impl From<BadgeCount> for BadgeModel {
    fn from(c: BadgeCount) -> Self {
        Self::now(c.count, c.app_point)
    }
}
