use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::execution::LedgerSnapshot;
use crate::models::{HistoryStatus, Position, Side, TradeHistoryEntry, TradeKind};
use crate::persistence::LedgerStore;
use crate::Result;

/// Postgres persistence for the position ledger and trade history
pub struct PostgresLedgerStore {
    pool: PgPool,
    wallet: String,
}

/// u128 amount as a NUMERIC value
fn to_numeric(value: u128) -> Result<Decimal> {
    Ok(Decimal::from_str_exact(&value.to_string())?)
}

fn from_numeric(value: Decimal) -> Result<u128> {
    Ok(value.trunc().to_string().parse()?)
}

/// Unit enum variant as its serde name, e.g. `TradeKind::OpenLong` -> "open_long"
fn variant_name<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Err(format!("expected a unit variant, got {}", other).into()),
    }
}

fn parse_variant<T: serde::de::DeserializeOwned>(name: String) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(name))?)
}

impl PostgresLedgerStore {
    /// Connect to Postgres
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    /// * `wallet` - Signing wallet the ledger belongs to
    pub async fn new(database_url: &str, wallet: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self {
            pool,
            wallet: wallet.to_string(),
        })
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT order_ref, instrument_id, side, size, margin, close_price,
                   opened_at, leverage, stop_loss_percentage
            FROM ledger_positions
            WHERE wallet = $1
            ORDER BY opened_at ASC
            "#,
        )
        .bind(&self.wallet)
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());

        for row in rows {
            let size: Decimal = row.get("size");
            let margin: Decimal = row.get("margin");
            let close_price: Decimal = row.get("close_price");
            let side: String = row.get("side");

            positions.push(Position {
                order_ref: row.get("order_ref"),
                instrument_id: row.get("instrument_id"),
                side: side.parse::<Side>()?,
                size: from_numeric(size)?,
                margin: from_numeric(margin)?,
                close_price: from_numeric(close_price)?,
                opened_at: row.get("opened_at"),
                leverage: row.get("leverage"),
                stop_loss_percentage: row.get("stop_loss_percentage"),
            });
        }

        Ok(positions)
    }

    async fn load_history(&self) -> Result<Vec<TradeHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, description, status, tx_ref, params, result,
                   error, duration_ms, recorded_at
            FROM trade_history
            WHERE wallet = $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(&self.wallet)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }
}

fn history_from_row(row: sqlx::postgres::PgRow) -> Result<TradeHistoryEntry> {
    let params: String = row.get("params");
    let result: Option<String> = row.get("result");
    let duration_ms: i64 = row.get("duration_ms");
    let recorded_at: DateTime<Utc> = row.get("recorded_at");

    Ok(TradeHistoryEntry {
        id: row.get::<Uuid, _>("id"),
        kind: parse_variant::<TradeKind>(row.get("kind"))?,
        description: row.get("description"),
        status: parse_variant::<HistoryStatus>(row.get("status"))?,
        tx_ref: row.get("tx_ref"),
        params: serde_json::from_str(&params)?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.get("error"),
        duration_ms: duration_ms.max(0) as u64,
        recorded_at,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ledger_positions WHERE wallet = $1")
            .bind(&self.wallet)
            .execute(&mut *tx)
            .await?;

        for position in &snapshot.positions {
            sqlx::query(
                r#"
                INSERT INTO ledger_positions (
                    wallet, order_ref, instrument_id, side, size, margin,
                    close_price, opened_at, leverage, stop_loss_percentage
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(&self.wallet)
            .bind(&position.order_ref)
            .bind(&position.instrument_id)
            .bind(position.side.as_str())
            .bind(to_numeric(position.size)?)
            .bind(to_numeric(position.margin)?)
            .bind(to_numeric(position.close_price)?)
            .bind(position.opened_at)
            .bind(position.leverage)
            .bind(position.stop_loss_percentage)
            .execute(&mut *tx)
            .await?;
        }

        // History is append-only; rows already written are left alone
        for entry in &snapshot.history {
            sqlx::query(
                r#"
                INSERT INTO trade_history (
                    id, wallet, kind, description, status, tx_ref, params,
                    result, error, duration_ms, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(entry.id)
            .bind(&self.wallet)
            .bind(variant_name(&entry.kind)?)
            .bind(&entry.description)
            .bind(variant_name(&entry.status)?)
            .bind(&entry.tx_ref)
            .bind(entry.params.to_string())
            .bind(entry.result.as_ref().map(|r| r.to_string()))
            .bind(&entry.error)
            .bind(entry.duration_ms as i64)
            .bind(entry.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Saved ledger ({} positions, {} history entries) to Postgres",
            snapshot.positions.len(),
            snapshot.history.len()
        );

        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let positions = self.load_positions().await?;
        let history = self.load_history().await?;

        if positions.is_empty() && history.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            "Loaded {} positions and {} history entries from Postgres",
            positions.len(),
            history.len()
        );

        Ok(Some(LedgerSnapshot { positions, history }))
    }
}
