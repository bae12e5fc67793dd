//! SQLite-backed `RoleLimitResolver`. A user's effective quotas come from
//! their highest-priority non-expired role assignment; a user with no
//! assignment gets `UserQuotas::default()` (the conservative free-tier
//! limits named on the type).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{IntervalUnit, ScheduleResolution, UserQuotas};
use crate::domain::ports::{RoleLimitResolver, RoleSweepOutcome};
use crate::infrastructure::persistence::codec::{from_json, timestamp_to_text};
use crate::infrastructure::persistence::sqlite_store::SqliteStore;

fn resolution_of(unit: IntervalUnit) -> ScheduleResolution {
    match unit {
        IntervalUnit::Days => ScheduleResolution::Day,
        IntervalUnit::Weeks => ScheduleResolution::Week,
        IntervalUnit::Months => ScheduleResolution::Month,
    }
}

#[async_trait]
impl RoleLimitResolver for SqliteStore {
    async fn get_user_quotas(&self, user_id: Uuid) -> CoordinatorResult<UserQuotas> {
        let now = timestamp_to_text(Utc::now());
        let row = sqlx::query(
            r#"
            SELECT l.* FROM role_assignments a
            JOIN role_limits l ON l.role_name = a.role_name
            WHERE a.user_id = ? AND (a.expires_at IS NULL OR a.expires_at > ?)
            ORDER BY a.priority DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .bind(now)
        .fetch_optional(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;

        let Some(row) = row else {
            return Ok(UserQuotas::default());
        };

        let schedule_resolution_json: String = row.try_get("schedule_resolution").map_err(|e| CoordinatorError::Other(e.into()))?;
        let resolutions: Vec<ScheduleResolution> = from_json(&schedule_resolution_json).map_err(CoordinatorError::Other)?;

        Ok(UserQuotas {
            max_parallel_analysis: row_u32(&row, "max_parallel_analysis")?,
            max_rebalance_stocks: row_u32(&row, "max_rebalance_stocks")?,
            schedule_resolution: resolutions.into_iter().collect::<HashSet<_>>(),
            rebalance_access: row_bool(&row, "rebalance_access")?,
            opportunity_agent_access: row_bool(&row, "opportunity_agent_access")?,
            enable_live_trading: row_bool(&row, "enable_live_trading")?,
            enable_auto_trading: row_bool(&row, "enable_auto_trading")?,
            max_debate_rounds: row_u32(&row, "max_debate_rounds")?,
            near_limit_analysis_access: row_bool(&row, "near_limit_analysis_access")?,
        })
    }

    async fn sweep(&self) -> CoordinatorResult<RoleSweepOutcome> {
        let now = timestamp_to_text(Utc::now());
        sqlx::query("DELETE FROM role_assignments WHERE expires_at IS NOT NULL AND expires_at < ?")
            .bind(&now)
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;

        let schedules_disabled = self.disable_out_of_resolution_schedules().await?;

        let near_limit_flags_disabled = sqlx::query(
            r#"
            UPDATE user_api_settings
            SET auto_near_limit_analysis = 0
            WHERE auto_near_limit_analysis = 1
            AND user_id NOT IN (
                SELECT a.user_id FROM role_assignments a
                JOIN role_limits l ON l.role_name = a.role_name
                WHERE (a.expires_at IS NULL OR a.expires_at > ?) AND l.near_limit_analysis_access = 1
            )
            "#,
        )
        .bind(&now)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?
        .rows_affected() as u32;

        Ok(RoleSweepOutcome { schedules_disabled, near_limit_flags_disabled })
    }
}

impl SqliteStore {
    /// §4.3's first sweep behaviour: a rule stays `enabled` only while its
    /// `interval_unit`'s resolution is still in the owning user's current
    /// `schedule_resolution` set.
    async fn disable_out_of_resolution_schedules(&self) -> CoordinatorResult<u32> {
        let rows = sqlx::query("SELECT id, user_id, interval_unit FROM schedule_rules WHERE enabled = 1")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;

        let mut quotas_by_user: std::collections::HashMap<Uuid, UserQuotas> = std::collections::HashMap::new();
        let mut disabled = 0u32;

        for row in rows {
            let id: String = row.try_get("id").map_err(|e| CoordinatorError::Other(e.into()))?;
            let user_id_text: String = row.try_get("user_id").map_err(|e| CoordinatorError::Other(e.into()))?;
            let interval_unit: String = row.try_get("interval_unit").map_err(|e| CoordinatorError::Other(e.into()))?;
            let unit: IntervalUnit = from_json(&format!("\"{interval_unit}\"")).map_err(CoordinatorError::Other)?;
            let user_id = Uuid::parse_str(&user_id_text).map_err(|e| CoordinatorError::Other(e.into()))?;

            let quotas = match quotas_by_user.get(&user_id) {
                Some(q) => q.clone(),
                None => {
                    let q = self.get_user_quotas(user_id).await?;
                    quotas_by_user.insert(user_id, q.clone());
                    q
                }
            };

            if !quotas.schedule_resolution.contains(&resolution_of(unit)) {
                sqlx::query("UPDATE schedule_rules SET enabled = 0 WHERE id = ?")
                    .bind(&id)
                    .execute(&self.db.pool)
                    .await
                    .map_err(|e| CoordinatorError::Other(e.into()))?;
                disabled += 1;
            }
        }

        Ok(disabled)
    }
}

fn row_u32(row: &sqlx::sqlite::SqliteRow, col: &str) -> CoordinatorResult<u32> {
    let value: i64 = row.try_get(col).map_err(|e| CoordinatorError::Other(e.into()))?;
    Ok(value as u32)
}

fn row_bool(row: &sqlx::sqlite::SqliteRow, col: &str) -> CoordinatorResult<bool> {
    let value: i64 = row.try_get(col).map_err(|e| CoordinatorError::Other(e.into()))?;
    Ok(value != 0)
}
