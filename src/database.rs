use crate::models::{ExchangeFee, FeePoint, FeeSchedule, KlineRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, warn};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS candlesticks (
    ts TIMESTAMPTZ NOT NULL,
    symbol TEXT NOT NULL,
    interval TEXT NOT NULL,
    open DOUBLE PRECISION NOT NULL,
    high DOUBLE PRECISION NOT NULL,
    low DOUBLE PRECISION NOT NULL,
    close DOUBLE PRECISION NOT NULL,
    volume DOUBLE PRECISION NOT NULL,
    close_time TIMESTAMPTZ NOT NULL,
    quote_asset_volume DOUBLE PRECISION NOT NULL,
    number_of_trades BIGINT NOT NULL,
    taker_buy_base DOUBLE PRECISION NOT NULL,
    taker_buy_quote DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (symbol, interval, ts)
);
CREATE TABLE IF NOT EXISTS sync_state (
    symbol TEXT NOT NULL,
    interval TEXT NOT NULL,
    last_closed_ts TIMESTAMPTZ,
    PRIMARY KEY (symbol, interval)
);
CREATE TABLE IF NOT EXISTS exchange_fees (
    ts TIMESTAMPTZ NOT NULL,
    symbol TEXT NOT NULL,
    maker_bps DOUBLE PRECISION NOT NULL,
    taker_bps DOUBLE PRECISION NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (symbol, ts)
);
";

const HYPERTABLE_SQL: &str =
    "SELECT create_hypertable('candlesticks', 'ts', if_not_exists => TRUE, migrate_data => TRUE)";

const KLINE_COLUMNS: &str = "ts, symbol, interval, open, high, low, close, volume, close_time,
       quote_asset_volume, number_of_trades, taker_buy_base, taker_buy_quote";

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        client
            .batch_execute("SET TIME ZONE 'UTC'")
            .await
            .context("failed to set session time zone")?;

        Ok(Self { client })
    }

    /// Create the tables when missing. The hypertable conversion is attempted
    /// but only warned about on plain PostgreSQL.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .await
            .context("failed to create schema")?;
        if let Err(err) = self.client.batch_execute(HYPERTABLE_SQL).await {
            warn!("candlesticks left as a plain table: {}", err);
        }
        Ok(())
    }

    /// Insert klines in one transaction, skipping rows that already exist.
    /// Returns the number of rows actually inserted.
    pub async fn upsert_klines(&mut self, rows: &[KlineRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO candlesticks (ts, symbol, interval, open, high, low, close, volume, close_time,
                    quote_asset_volume, number_of_trades, taker_buy_base, taker_buy_quote)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (symbol, interval, ts) DO NOTHING",
            )
            .await?;

        let mut inserted = 0;
        for row in rows {
            inserted += tx
                .execute(
                    &stmt,
                    &[
                        &row.ts,
                        &row.symbol,
                        &row.interval,
                        &row.open,
                        &row.high,
                        &row.low,
                        &row.close,
                        &row.volume,
                        &row.close_ts,
                        &row.quote_volume,
                        &row.trades,
                        &row.taker_buy_base,
                        &row.taker_buy_quote,
                    ],
                )
                .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Klines ascending by open time, optionally bounded (inclusive) and limited.
    pub async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<KlineRow>> {
        let mut sql = format!(
            "SELECT {} FROM candlesticks WHERE symbol = $1 AND interval = $2",
            KLINE_COLUMNS
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&symbol, &interval];
        if let Some(start) = start.as_ref() {
            params.push(start);
            sql.push_str(&format!(" AND ts >= ${}", params.len()));
        }
        if let Some(end) = end.as_ref() {
            params.push(end);
            sql.push_str(&format!(" AND ts <= ${}", params.len()));
        }
        sql.push_str(" ORDER BY ts ASC");
        if let Some(limit) = limit.as_ref() {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let rows = self.client.query(sql.as_str(), &params).await?;
        rows.iter().map(Self::map_kline_row).collect()
    }

    /// The most recent `n` klines, returned oldest first.
    pub async fn fetch_latest_n(&self, symbol: &str, interval: &str, n: i64) -> Result<Vec<KlineRow>> {
        let sql = format!(
            "SELECT {} FROM candlesticks WHERE symbol = $1 AND interval = $2 ORDER BY ts DESC LIMIT $3",
            KLINE_COLUMNS
        );
        let rows = self.client.query(sql.as_str(), &[&symbol, &interval, &n]).await?;
        let mut klines = rows
            .iter()
            .map(Self::map_kline_row)
            .collect::<Result<Vec<_>>>()?;
        klines.reverse();
        Ok(klines)
    }

    pub async fn get_last_closed_ts(&self, symbol: &str, interval: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self
            .client
            .query_opt(
                "SELECT last_closed_ts FROM sync_state WHERE symbol = $1 AND interval = $2",
                &[&symbol, &interval],
            )
            .await?;
        Ok(row.and_then(|row| row.get::<_, Option<DateTime<Utc>>>(0)))
    }

    pub async fn set_last_closed_ts(&self, symbol: &str, interval: &str, ts: DateTime<Utc>) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_state (symbol, interval, last_closed_ts)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (symbol, interval) DO UPDATE
                   SET last_closed_ts = EXCLUDED.last_closed_ts",
                &[&symbol, &interval, &ts],
            )
            .await?;
        Ok(())
    }

    pub async fn upsert_exchange_fees(&mut self, fees: &[ExchangeFee]) -> Result<u64> {
        if fees.is_empty() {
            return Ok(0);
        }

        let tx = self.client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO exchange_fees (ts, symbol, maker_bps, taker_bps, source)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (symbol, ts) DO UPDATE
                   SET maker_bps = EXCLUDED.maker_bps,
                       taker_bps = EXCLUDED.taker_bps,
                       source = EXCLUDED.source",
            )
            .await?;

        let mut written = 0;
        for fee in fees {
            written += tx
                .execute(
                    &stmt,
                    &[&fee.ts, &fee.symbol, &fee.maker_bps, &fee.taker_bps, &fee.source],
                )
                .await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Taker fee history for a symbol as a step schedule.
    pub async fn fetch_fee_schedule(&self, symbol: &str) -> Result<FeeSchedule> {
        let rows = self
            .client
            .query(
                "SELECT ts, taker_bps FROM exchange_fees WHERE symbol = $1 ORDER BY ts ASC",
                &[&symbol],
            )
            .await?;
        let points = rows
            .iter()
            .map(|row| -> Result<FeePoint> {
                Ok(FeePoint {
                    effective_from: row.try_get("ts")?,
                    bps: row.try_get("taker_bps")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FeeSchedule::new(points))
    }

    fn map_kline_row(row: &Row) -> Result<KlineRow> {
        Ok(KlineRow {
            ts: row.try_get("ts")?,
            symbol: row.try_get("symbol")?,
            interval: row.try_get("interval")?,
            open: row.try_get("open")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            close: row.try_get("close")?,
            volume: row.try_get("volume")?,
            close_ts: row.try_get("close_time")?,
            quote_volume: row.try_get("quote_asset_volume")?,
            trades: row.try_get("number_of_trades")?,
            taker_buy_base: row.try_get("taker_buy_base")?,
            taker_buy_quote: row.try_get("taker_buy_quote")?,
        })
    }
}
