//! SQLite-backed `TradeOrderStore`. Dedup/cleanup queries mirror
//! `TradeOrder::dedup_key` so the store and the domain model never disagree
//! about what counts as "the same" order.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::{CoordinatorError, CoordinatorResult};
use crate::domain::models::{AlpacaOrderMeta, TradeOrder, TradeOrderMetadata};
use crate::domain::ports::{TradeOrderSource, TradeOrderStore};
use crate::domain::status::TradeOrderStatus;
use crate::infrastructure::persistence::codec::{timestamp_to_text, to_json};
use crate::infrastructure::persistence::sqlite_store::{SqliteStore, row_to_trade_order, trade_order_bind_values};

struct SourcePredicate {
    clause: &'static str,
    analysis_id: Option<String>,
    rebalance_request_id: Option<String>,
}

fn source_predicate(source: TradeOrderSource) -> SourcePredicate {
    match source {
        TradeOrderSource::Analysis(id) => SourcePredicate {
            clause: "analysis_id = ?",
            analysis_id: Some(id.to_string()),
            rebalance_request_id: None,
        },
        TradeOrderSource::Rebalance(id) => SourcePredicate {
            clause: "analysis_id IS NULL AND rebalance_request_id = ?",
            analysis_id: None,
            rebalance_request_id: Some(id.to_string()),
        },
        TradeOrderSource::Manual => SourcePredicate {
            clause: "analysis_id IS NULL AND rebalance_request_id IS NULL",
            analysis_id: None,
            rebalance_request_id: None,
        },
    }
}

#[async_trait]
impl TradeOrderStore for SqliteStore {
    async fn insert_trade_order(&self, order: &TradeOrder) -> CoordinatorResult<()> {
        let v = trade_order_bind_values(order).map_err(CoordinatorError::Other)?;
        sqlx::query(
            r#"
            INSERT INTO trade_orders
                (id, user_id, ticker, action, shares, dollar_amount, status, analysis_id,
                 rebalance_request_id, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(v.id)
        .bind(v.user_id)
        .bind(v.ticker)
        .bind(v.action)
        .bind(v.shares)
        .bind(v.dollar_amount)
        .bind(v.status)
        .bind(v.analysis_id)
        .bind(v.rebalance_request_id)
        .bind(v.metadata)
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn get_trade_order(&self, id: Uuid) -> CoordinatorResult<TradeOrder> {
        let row = sqlx::query("SELECT * FROM trade_orders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?
            .ok_or_else(|| CoordinatorError::NotFound(format!("trade order {id} not found")))?;
        row_to_trade_order(&row).map_err(CoordinatorError::Other)
    }

    async fn find_sibling_decided(
        &self,
        user_id: Uuid,
        ticker: &str,
        source: TradeOrderSource,
    ) -> CoordinatorResult<Option<TradeOrder>> {
        let pred = source_predicate(source);
        let sql = format!(
            "SELECT * FROM trade_orders WHERE user_id = ? AND ticker = ? AND status != 'pending' AND {} ORDER BY created_at DESC LIMIT 1",
            pred.clause
        );
        let mut query = sqlx::query(&sql).bind(user_id.to_string()).bind(ticker);
        if let Some(a) = pred.analysis_id {
            query = query.bind(a);
        }
        if let Some(r) = pred.rebalance_request_id {
            query = query.bind(r);
        }
        let row = query
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        row.as_ref().map(row_to_trade_order).transpose().map_err(CoordinatorError::Other)
    }

    async fn cleanup_duplicates(&self, user_id: Uuid, ticker: &str, source: TradeOrderSource, keep: Uuid) -> CoordinatorResult<()> {
        let pred = source_predicate(source);
        let sql = format!(
            "DELETE FROM trade_orders WHERE user_id = ? AND ticker = ? AND status = 'pending' AND id != ? AND {}",
            pred.clause
        );
        let mut query = sqlx::query(&sql).bind(user_id.to_string()).bind(ticker).bind(keep.to_string());
        if let Some(a) = pred.analysis_id {
            query = query.bind(a);
        }
        if let Some(r) = pred.rebalance_request_id {
            query = query.bind(r);
        }
        query.execute(&self.db.pool).await.map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn update_trade_order_status(&self, id: Uuid, status: TradeOrderStatus, metadata: TradeOrderMetadata) -> CoordinatorResult<()> {
        let metadata_json = to_json(&metadata).map_err(CoordinatorError::Other)?;
        let result = sqlx::query("UPDATE trade_orders SET status = ?, metadata = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(metadata_json)
            .bind(timestamp_to_text(Utc::now()))
            .bind(id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(CoordinatorError::NotFound(format!("trade order {id} not found")));
        }
        Ok(())
    }

    async fn update_trade_order_broker_fields(&self, id: Uuid, alpaca_order: AlpacaOrderMeta) -> CoordinatorResult<()> {
        let mut order = self.get_trade_order(id).await?;
        order.metadata.alpaca_order = Some(alpaca_order);
        let metadata_json = to_json(&order.metadata).map_err(CoordinatorError::Other)?;
        sqlx::query("UPDATE trade_orders SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(metadata_json)
            .bind(timestamp_to_text(Utc::now()))
            .bind(id.to_string())
            .execute(&self.db.pool)
            .await
            .map_err(|e| CoordinatorError::Other(e.into()))?;
        Ok(())
    }

    async fn list_pending_for_source(&self, source: TradeOrderSource) -> CoordinatorResult<Vec<TradeOrder>> {
        let pred = source_predicate(source);
        let sql = format!("SELECT * FROM trade_orders WHERE status = 'pending' AND {}", pred.clause);
        let mut query = sqlx::query(&sql);
        if let Some(a) = pred.analysis_id {
            query = query.bind(a);
        }
        if let Some(r) = pred.rebalance_request_id {
            query = query.bind(r);
        }
        let rows = query.fetch_all(&self.db.pool).await.map_err(|e| CoordinatorError::Other(e.into()))?;
        rows.iter()
            .map(|r| row_to_trade_order(r).map_err(CoordinatorError::Other))
            .collect()
    }
}
