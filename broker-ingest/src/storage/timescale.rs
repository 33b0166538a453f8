//! TimescaleDB time-series backend.
//!
//! Each record type lives in its own hypertable partitioned on `ts` with
//! one-day chunks. Order book levels are stored as JSONB arrays so a
//! snapshot stays a single row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};
use trading_common::data::{BookLevel, Candle, OrderBook, Ticker};

use super::error::{StorageError, StorageResult};
use super::filter::TimeSeriesFilter;
use super::postgres::{parse_column, PgConnector};
use super::traits::{
    TableStats, TimeSeriesStats, TimeSeriesStorage, CANDLES_TABLE, ORDER_BOOKS_TABLE,
    TICKERS_TABLE,
};
use crate::config::DatabaseSettings;

const DEFAULT_BATCH_SIZE: usize = 1000;

/// PostgreSQL limit on bind parameters in one statement
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

const TICKER_COLUMNS: &str = "ts, symbol, instrument_type, market_type, broker_id, \
     price, bid, ask, bid_size, ask_size, volume_24h, change_24h";

const CANDLE_COLUMNS: &str = "ts, symbol, instrument_type, market_type, broker_id, \
     interval, open, high, low, close, volume, trade_count, open_time, close_time";

const ORDER_BOOK_COLUMNS: &str =
    "ts, symbol, instrument_type, market_type, broker_id, bids, asks, sequence";

const TABLE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tickers (
        ts TIMESTAMPTZ NOT NULL,
        symbol VARCHAR(64) NOT NULL,
        instrument_type VARCHAR(16) NOT NULL,
        market_type VARCHAR(16) NOT NULL,
        broker_id VARCHAR(64) NOT NULL,
        price NUMERIC NOT NULL,
        bid NUMERIC NOT NULL,
        ask NUMERIC NOT NULL,
        bid_size NUMERIC NOT NULL,
        ask_size NUMERIC NOT NULL,
        volume_24h NUMERIC NOT NULL,
        change_24h NUMERIC NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candles (
        ts TIMESTAMPTZ NOT NULL,
        symbol VARCHAR(64) NOT NULL,
        instrument_type VARCHAR(16) NOT NULL,
        market_type VARCHAR(16) NOT NULL,
        broker_id VARCHAR(64) NOT NULL,
        interval VARCHAR(8) NOT NULL,
        open NUMERIC NOT NULL,
        high NUMERIC NOT NULL,
        low NUMERIC NOT NULL,
        close NUMERIC NOT NULL,
        volume NUMERIC NOT NULL,
        trade_count BIGINT NOT NULL,
        open_time TIMESTAMPTZ NOT NULL,
        close_time TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_books (
        ts TIMESTAMPTZ NOT NULL,
        symbol VARCHAR(64) NOT NULL,
        instrument_type VARCHAR(16) NOT NULL,
        market_type VARCHAR(16) NOT NULL,
        broker_id VARCHAR(64) NOT NULL,
        bids JSONB NOT NULL,
        asks JSONB NOT NULL,
        sequence BIGINT NOT NULL
    )
    "#,
];

/// Time-series store on TimescaleDB
pub struct TimescaleStorage {
    connector: PgConnector,
    batch_size: usize,
}

impl TimescaleStorage {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            connector: PgConnector::new("timeseries", settings),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Use an existing pool; `connect` becomes a no-op
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            connector: PgConnector::with_pool("timeseries", pool),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows per INSERT statement, capped per table by the bind parameter limit
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn rows_per_statement(&self, columns: &str) -> usize {
        let binds_per_row = columns.split(',').count();
        self.batch_size.min(MAX_BIND_PARAMS / binds_per_row).max(1)
    }

    async fn create_hypertable(pool: &PgPool, table: &str) -> StorageResult<()> {
        let sql = format!(
            "SELECT create_hypertable('{}', 'ts', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
            table
        );
        let result = sqlx::query(&sql).execute(pool).await;

        match result {
            Ok(_) => info!("Hypertable {} ready", table),
            Err(e) if e.to_string().contains("already a hypertable") => {
                debug!("{} is already a hypertable", table);
            }
            Err(e) => warn!("Hypertable creation warning for {}: {}", table, e),
        }
        Ok(())
    }

    async fn insert_ticker_batch(&self, pool: &PgPool, tickers: &[Ticker]) -> StorageResult<u64> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("INSERT INTO tickers ({}) ", TICKER_COLUMNS));
        qb.push_values(tickers, |mut b, t| {
            b.push_bind(t.timestamp)
                .push_bind(&t.symbol)
                .push_bind(t.instrument_type.as_str())
                .push_bind(t.market_type.as_str())
                .push_bind(&t.broker_id)
                .push_bind(t.price)
                .push_bind(t.bid)
                .push_bind(t.ask)
                .push_bind(t.bid_size)
                .push_bind(t.ask_size)
                .push_bind(t.volume_24h)
                .push_bind(t.change_24h);
        });
        Ok(qb.build().execute(pool).await?.rows_affected())
    }

    async fn insert_candle_batch(&self, pool: &PgPool, candles: &[Candle]) -> StorageResult<u64> {
        let counts = candles
            .iter()
            .map(|c| to_i64("trade_count", c.trade_count))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("INSERT INTO candles ({}) ", CANDLE_COLUMNS));
        qb.push_values(candles.iter().zip(counts), |mut b, (c, trade_count)| {
            b.push_bind(c.timestamp)
                .push_bind(&c.symbol)
                .push_bind(c.instrument_type.as_str())
                .push_bind(c.market_type.as_str())
                .push_bind(&c.broker_id)
                .push_bind(&c.interval)
                .push_bind(c.open)
                .push_bind(c.high)
                .push_bind(c.low)
                .push_bind(c.close)
                .push_bind(c.volume)
                .push_bind(trade_count)
                .push_bind(c.open_time)
                .push_bind(c.close_time);
        });
        Ok(qb.build().execute(pool).await?.rows_affected())
    }

    async fn insert_order_book_batch(
        &self,
        pool: &PgPool,
        books: &[OrderBook],
    ) -> StorageResult<u64> {
        let sequences = books
            .iter()
            .map(|b| to_i64("sequence", b.sequence))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO order_books ({}) ",
            ORDER_BOOK_COLUMNS
        ));
        qb.push_values(books.iter().zip(sequences), |mut b, (book, sequence)| {
            b.push_bind(book.timestamp)
                .push_bind(&book.symbol)
                .push_bind(book.instrument_type.as_str())
                .push_bind(book.market_type.as_str())
                .push_bind(&book.broker_id)
                .push_bind(Json(&book.bids))
                .push_bind(Json(&book.asks))
                .push_bind(sequence);
        });
        Ok(qb.build().execute(pool).await?.rows_affected())
    }

    async fn table_stats(pool: &PgPool, table: &'static str) -> StorageResult<TableStats> {
        let sql = format!(
            "SELECT COUNT(*)::BIGINT AS row_count, MIN(ts) AS oldest, MAX(ts) AS newest FROM {}",
            table
        );
        let row = sqlx::query(&sql).fetch_one(pool).await?;

        let size_bytes = match sqlx::query_scalar::<_, Option<i64>>(
            "SELECT hypertable_size($1::regclass)::BIGINT",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        {
            Ok(size) => size.and_then(|s| u64::try_from(s).ok()),
            Err(e) => {
                debug!("Could not read size of {}: {}", table, e);
                None
            }
        };

        Ok(TableStats {
            table: table.to_string(),
            row_count: from_i64("row_count", row.try_get("row_count")?)?,
            oldest: row.try_get("oldest")?,
            newest: row.try_get("newest")?,
            size_bytes,
        })
    }
}

fn to_i64(field: &str, value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("{} out of range: {}", field, value)))
}

fn from_i64(field: &str, value: i64) -> StorageResult<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative {}: {}", field, value)))
}

/// Append the shared WHERE restrictions. Each set filter binds one array so
/// every listed value participates.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TimeSeriesFilter) {
    if !filter.symbols.is_empty() {
        let symbols: Vec<String> = filter.symbols.iter().cloned().collect();
        qb.push(" AND symbol = ANY(").push_bind(symbols).push(")");
    }
    if !filter.broker_ids.is_empty() {
        let brokers: Vec<String> = filter.broker_ids.iter().cloned().collect();
        qb.push(" AND broker_id = ANY(").push_bind(brokers).push(")");
    }
    if !filter.market_types.is_empty() {
        let markets: Vec<String> = filter
            .market_types
            .iter()
            .map(|m| m.as_str().to_string())
            .collect();
        qb.push(" AND market_type = ANY(").push_bind(markets).push(")");
    }
    if !filter.instrument_types.is_empty() {
        let types: Vec<String> = filter
            .instrument_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        qb.push(" AND instrument_type = ANY(").push_bind(types).push(")");
    }
    if let Some(start) = filter.start {
        qb.push(" AND ts >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND ts <= ").push_bind(end);
    }
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_paging(qb: &mut QueryBuilder<'_, Postgres>, filter: &TimeSeriesFilter) {
    qb.push(" ORDER BY ts ASC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(saturating_i64(limit));
    }
    if let Some(offset) = filter.offset {
        qb.push(" OFFSET ").push_bind(saturating_i64(offset));
    }
}

fn select(
    columns: &str,
    table: &str,
    filter: &TimeSeriesFilter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {} WHERE TRUE", columns, table));
    push_filter(&mut qb, filter);
    if table == CANDLES_TABLE {
        if let Some(interval) = &filter.interval {
            qb.push(" AND interval = ").push_bind(interval.clone());
        }
    }
    push_paging(&mut qb, filter);
    qb
}

fn ticker_from_row(row: &PgRow) -> StorageResult<Ticker> {
    Ok(Ticker {
        symbol: row.try_get("symbol")?,
        instrument_type: parse_column("instrument_type", row.try_get("instrument_type")?)?,
        market_type: parse_column("market_type", row.try_get("market_type")?)?,
        broker_id: row.try_get("broker_id")?,
        price: row.try_get("price")?,
        bid: row.try_get("bid")?,
        ask: row.try_get("ask")?,
        bid_size: row.try_get("bid_size")?,
        ask_size: row.try_get("ask_size")?,
        volume_24h: row.try_get("volume_24h")?,
        change_24h: row.try_get("change_24h")?,
        timestamp: row.try_get("ts")?,
    })
}

fn candle_from_row(row: &PgRow) -> StorageResult<Candle> {
    Ok(Candle {
        symbol: row.try_get("symbol")?,
        instrument_type: parse_column("instrument_type", row.try_get("instrument_type")?)?,
        market_type: parse_column("market_type", row.try_get("market_type")?)?,
        broker_id: row.try_get("broker_id")?,
        interval: row.try_get("interval")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        trade_count: from_i64("trade_count", row.try_get("trade_count")?)?,
        open_time: row.try_get("open_time")?,
        close_time: row.try_get("close_time")?,
        timestamp: row.try_get("ts")?,
    })
}

fn order_book_from_row(row: &PgRow) -> StorageResult<OrderBook> {
    let bids: Json<Vec<BookLevel>> = row.try_get("bids")?;
    let asks: Json<Vec<BookLevel>> = row.try_get("asks")?;
    Ok(OrderBook {
        symbol: row.try_get("symbol")?,
        instrument_type: parse_column("instrument_type", row.try_get("instrument_type")?)?,
        market_type: parse_column("market_type", row.try_get("market_type")?)?,
        broker_id: row.try_get("broker_id")?,
        bids: bids.0,
        asks: asks.0,
        sequence: from_i64("sequence", row.try_get("sequence")?)?,
        timestamp: row.try_get("ts")?,
    })
}

#[async_trait]
impl TimeSeriesStorage for TimescaleStorage {
    async fn connect(&self) -> StorageResult<()> {
        self.connector.connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.connector.disconnect().await;
        Ok(())
    }

    async fn health(&self) -> StorageResult<()> {
        self.connector.health().await
    }

    async fn migrate(&self) -> StorageResult<()> {
        let pool = self.connector.pool()?;
        info!("Running TimescaleDB migrations...");

        sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE")
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        for statement in TABLE_DDL {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
        }

        for table in [TICKERS_TABLE, CANDLES_TABLE, ORDER_BOOKS_TABLE] {
            Self::create_hypertable(&pool, table).await?;

            for index in [
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{0}_symbol_broker_ts ON {0} (symbol, broker_id, ts DESC)",
                    table
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{0}_types_ts ON {0} (market_type, instrument_type, ts DESC)",
                    table
                ),
            ] {
                sqlx::query(&index)
                    .execute(&pool)
                    .await
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
            }
        }

        info!("TimescaleDB migrations completed");
        Ok(())
    }

    async fn save_tickers(&self, tickers: &[Ticker]) -> StorageResult<usize> {
        if tickers.is_empty() {
            return Ok(0);
        }
        let pool = self.connector.pool()?;
        let mut total = 0;
        for chunk in tickers.chunks(self.rows_per_statement(TICKER_COLUMNS)) {
            total += self.insert_ticker_batch(&pool, chunk).await?;
        }
        debug!("Batch inserted {} tickers", total);
        Ok(total as usize)
    }

    async fn save_candles(&self, candles: &[Candle]) -> StorageResult<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        let pool = self.connector.pool()?;
        let mut total = 0;
        for chunk in candles.chunks(self.rows_per_statement(CANDLE_COLUMNS)) {
            total += self.insert_candle_batch(&pool, chunk).await?;
        }
        debug!("Batch inserted {} candles", total);
        Ok(total as usize)
    }

    async fn save_order_books(&self, books: &[OrderBook]) -> StorageResult<usize> {
        if books.is_empty() {
            return Ok(0);
        }
        let pool = self.connector.pool()?;
        let mut total = 0;
        for chunk in books.chunks(self.rows_per_statement(ORDER_BOOK_COLUMNS)) {
            total += self.insert_order_book_batch(&pool, chunk).await?;
        }
        debug!("Batch inserted {} order books", total);
        Ok(total as usize)
    }

    async fn get_tickers(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Ticker>> {
        let pool = self.connector.pool()?;
        let rows = select(TICKER_COLUMNS, TICKERS_TABLE, filter)
            .build()
            .fetch_all(&pool)
            .await?;
        rows.iter().map(ticker_from_row).collect()
    }

    async fn get_candles(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Candle>> {
        let pool = self.connector.pool()?;
        let rows = select(CANDLE_COLUMNS, CANDLES_TABLE, filter)
            .build()
            .fetch_all(&pool)
            .await?;
        rows.iter().map(candle_from_row).collect()
    }

    async fn get_order_books(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<OrderBook>> {
        let pool = self.connector.pool()?;
        let rows = select(ORDER_BOOK_COLUMNS, ORDER_BOOKS_TABLE, filter)
            .build()
            .fetch_all(&pool)
            .await?;
        rows.iter().map(order_book_from_row).collect()
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let pool = self.connector.pool()?;
        let mut removed = 0;
        for table in [TICKERS_TABLE, CANDLES_TABLE, ORDER_BOOKS_TABLE] {
            let sql = format!("DELETE FROM {} WHERE ts < $1", table);
            let result = sqlx::query(&sql).bind(cutoff).execute(&pool).await?;
            debug!("Removed {} rows from {}", result.rows_affected(), table);
            removed += result.rows_affected();
        }
        info!("Retention cleanup removed {} rows older than {}", removed, cutoff);
        Ok(removed)
    }

    async fn stats(&self) -> StorageResult<TimeSeriesStats> {
        let pool = self.connector.pool()?;
        let mut tables = Vec::with_capacity(3);
        for table in [TICKERS_TABLE, CANDLES_TABLE, ORDER_BOOKS_TABLE] {
            tables.push(Self::table_stats(&pool, table).await?);
        }
        Ok(TimeSeriesStats { tables })
    }
}
