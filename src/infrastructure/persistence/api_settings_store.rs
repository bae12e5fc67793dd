//! SQLite-backed `ApiSettingsStore`.

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::UserApiSettings;
use crate::domain::ports::ApiSettingsStore;
use crate::infrastructure::persistence::codec::from_json;
use crate::infrastructure::persistence::sqlite_store::SqliteStore;

#[async_trait]
impl ApiSettingsStore for SqliteStore {
    async fn get_api_settings(&self, user_id: Uuid) -> CoordinatorResult<UserApiSettings> {
        let row = sqlx::query("SELECT * FROM user_api_settings WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| CoordinatorError::NotFound(format!("api settings for user {user_id} not found")))?;

        let paper_trading: i64 = row.try_get("paper_trading").map_err(|e| CoordinatorError::Other(e.into()))?;
        let auto_execute_trades: i64 = row.try_get("auto_execute_trades").map_err(|e| CoordinatorError::Other(e.into()))?;
        let auto_near_limit_analysis: i64 = row.try_get("auto_near_limit_analysis").map_err(|e| CoordinatorError::Other(e.into()))?;
        let ai_provider_settings: String = row.try_get("ai_provider_settings").map_err(|e| CoordinatorError::Other(e.into()))?;

        Ok(UserApiSettings {
            user_id,
            alpaca_key_id: row.try_get("alpaca_key_id").map_err(|e| CoordinatorError::Other(e.into()))?,
            alpaca_secret_key: row.try_get("alpaca_secret_key").map_err(|e| CoordinatorError::Other(e.into()))?,
            paper_trading: paper_trading != 0,
            auto_execute_trades: auto_execute_trades != 0,
            auto_near_limit_analysis: auto_near_limit_analysis != 0,
            ai_provider: row.try_get("ai_provider").map_err(|e| CoordinatorError::Other(e.into()))?,
            ai_provider_settings: from_json(&ai_provider_settings).map_err(CoordinatorError::Other)?,
        })
    }
}
