use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::instrument;

use badgecast_core::{BadgeModel, ScopeId};

use crate::database::Database;
use crate::error::StoreError;

/// Persisted last-known badge per scope.
pub struct BadgeRepo {
    db: Database,
}

impl BadgeRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load the badge saved for a scope, if any.
    #[instrument(skip(self), fields(scope = %scope))]
    pub fn load(&self, scope: &ScopeId) -> Result<Option<BadgeModel>, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT count, app_point, timestamp FROM badge_state WHERE scope_id = ?1",
                    [scope.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, u32>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        match row {
            Some((count, app_point, timestamp)) => {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc);
                Ok(Some(BadgeModel::at(count, app_point, timestamp)))
            }
            None => Ok(None),
        }
    }

    /// Save (insert or replace) the badge for a scope.
    #[instrument(skip(self, badge), fields(scope = %scope, count = badge.count()))]
    pub fn save(&self, scope: &ScopeId, badge: &BadgeModel) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO badge_state (scope_id, count, app_point, timestamp, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(scope_id) DO UPDATE SET
                     count = excluded.count,
                     app_point = excluded.app_point,
                     timestamp = excluded.timestamp,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    scope.as_str(),
                    badge.count(),
                    badge.app_point(),
                    badge.timestamp().to_rfc3339(),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Remove the badge for a scope. Returns whether a row existed.
    #[instrument(skip(self), fields(scope = %scope))]
    pub fn delete(&self, scope: &ScopeId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM badge_state WHERE scope_id = ?1",
                [scope.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// All scopes with a saved badge.
    pub fn scopes(&self) -> Result<Vec<ScopeId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT scope_id FROM badge_state ORDER BY scope_id")?;
            let rows = stmt
                .query_map([], |row| Ok(ScopeId::from_raw(row.get::<_, String>(0)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
