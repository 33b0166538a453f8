//! PostgreSQL metadata backend

use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use trading_common::data::{DataType, Instrument, InstrumentKey};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::traits::MetadataStorage;
use crate::broker::BrokerConfig;
use crate::config::DatabaseSettings;
use crate::subscription::Subscription;

/// Lazily created connection pool shared by the PostgreSQL backends
pub(crate) struct PgConnector {
    backend: &'static str,
    settings: Option<DatabaseSettings>,
    pool: RwLock<Option<PgPool>>,
}

impl PgConnector {
    pub(crate) fn new(backend: &'static str, settings: DatabaseSettings) -> Self {
        Self {
            backend,
            settings: Some(settings),
            pool: RwLock::new(None),
        }
    }

    pub(crate) fn with_pool(backend: &'static str, pool: PgPool) -> Self {
        Self {
            backend,
            settings: None,
            pool: RwLock::new(Some(pool)),
        }
    }

    pub(crate) async fn connect(&self) -> StorageResult<()> {
        if self.pool.read().as_ref().is_some_and(|p| !p.is_closed()) {
            return Ok(());
        }
        let settings = self
            .settings
            .as_ref()
            .ok_or(StorageError::NotConnected(self.backend))?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(&settings.url)
            .await?;

        info!("Connected {} storage to PostgreSQL", self.backend);
        *self.pool.write() = Some(pool);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("Closed {} storage pool", self.backend);
        }
    }

    pub(crate) fn pool(&self) -> StorageResult<PgPool> {
        self.pool
            .read()
            .clone()
            .ok_or(StorageError::NotConnected(self.backend))
    }

    pub(crate) async fn health(&self) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }
}

pub(crate) fn parse_column<T>(column: &str, value: String) -> StorageResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| StorageError::InvalidData(format!("{}: {}", column, e)))
}

const METADATA_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        symbol VARCHAR(64) PRIMARY KEY,
        instrument_type VARCHAR(16) NOT NULL,
        market_type VARCHAR(16) NOT NULL,
        base_asset VARCHAR(32),
        quote_asset VARCHAR(32),
        exchange VARCHAR(32),
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id UUID PRIMARY KEY,
        symbol VARCHAR(64) NOT NULL REFERENCES instruments (symbol) ON DELETE CASCADE,
        instrument_type VARCHAR(16) NOT NULL,
        market_type VARCHAR(16) NOT NULL,
        broker_id VARCHAR(64) NOT NULL,
        data_types JSONB NOT NULL DEFAULT '[]',
        start_date TIMESTAMPTZ,
        settings JSONB NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_broker ON subscriptions (broker_id, symbol)",
    r#"
    CREATE TABLE IF NOT EXISTS broker_configs (
        id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(128) NOT NULL,
        broker_type VARCHAR(16) NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        config JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Metadata store on a PostgreSQL pool
pub struct PostgresMetadataStorage {
    connector: PgConnector,
}

impl PostgresMetadataStorage {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            connector: PgConnector::new("metadata", settings),
        }
    }

    /// Use an existing pool; `connect` becomes a no-op
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            connector: PgConnector::with_pool("metadata", pool),
        }
    }

    fn instrument_from_row(row: &PgRow) -> StorageResult<Instrument> {
        Ok(Instrument {
            symbol: row.try_get("symbol")?,
            instrument_type: parse_column("instrument_type", row.try_get("instrument_type")?)?,
            market_type: parse_column("market_type", row.try_get("market_type")?)?,
            base_asset: row.try_get("base_asset")?,
            quote_asset: row.try_get("quote_asset")?,
            exchange: row.try_get("exchange")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn subscription_from_row(row: &PgRow) -> StorageResult<Subscription> {
        let key = InstrumentKey::new(
            row.try_get::<String, _>("symbol")?,
            parse_column("instrument_type", row.try_get("instrument_type")?)?,
            parse_column("market_type", row.try_get("market_type")?)?,
        );
        let data_types: Json<Vec<DataType>> = row.try_get("data_types")?;
        let settings: Json<serde_json::Map<String, serde_json::Value>> =
            row.try_get("settings")?;

        Ok(Subscription {
            id: row.try_get("id")?,
            key,
            data_types: data_types.0,
            broker_id: row.try_get("broker_id")?,
            start_date: row.try_get("start_date")?,
            settings: settings.0,
            is_active: row.try_get("is_active")?,
        })
    }

    fn broker_config_from_row(row: &PgRow) -> StorageResult<BrokerConfig> {
        let config: Json<BrokerConfig> = row.try_get("config")?;
        Ok(config.0)
    }
}

#[async_trait]
impl MetadataStorage for PostgresMetadataStorage {
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
        info!("Running metadata migrations...");
        for statement in METADATA_SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
        }
        info!("Metadata migrations completed");
        Ok(())
    }

    async fn save_instrument(&self, instrument: &Instrument) -> StorageResult<()> {
        let pool = self.connector.pool()?;
        sqlx::query(
            r#"
            INSERT INTO instruments (
                symbol, instrument_type, market_type, base_asset, quote_asset,
                exchange, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (symbol) DO UPDATE SET
                instrument_type = EXCLUDED.instrument_type,
                market_type = EXCLUDED.market_type,
                base_asset = EXCLUDED.base_asset,
                quote_asset = EXCLUDED.quote_asset,
                exchange = EXCLUDED.exchange,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&instrument.symbol)
        .bind(instrument.instrument_type.as_str())
        .bind(instrument.market_type.as_str())
        .bind(&instrument.base_asset)
        .bind(&instrument.quote_asset)
        .bind(&instrument.exchange)
        .bind(instrument.is_active)
        .bind(instrument.created_at)
        .bind(instrument.updated_at)
        .execute(&pool)
        .await?;

        debug!("Saved instrument {}", instrument.symbol);
        Ok(())
    }

    async fn get_instrument(&self, symbol: &str) -> StorageResult<Option<Instrument>> {
        let pool = self.connector.pool()?;
        let row = sqlx::query("SELECT * FROM instruments WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(Self::instrument_from_row).transpose()
    }

    async fn list_instruments(&self, active_only: bool) -> StorageResult<Vec<Instrument>> {
        let pool = self.connector.pool()?;
        let rows = sqlx::query(
            "SELECT * FROM instruments WHERE ($1 = FALSE OR is_active) ORDER BY symbol",
        )
        .bind(active_only)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(Self::instrument_from_row).collect()
    }

    async fn delete_instrument(&self, symbol: &str) -> StorageResult<bool> {
        let pool = self.connector.pool()?;
        let result = sqlx::query("DELETE FROM instruments WHERE symbol = $1")
            .bind(symbol)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        let pool = self.connector.pool()?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, symbol, instrument_type, market_type, broker_id,
                data_types, start_date, settings, is_active, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (id) DO UPDATE SET
                data_types = EXCLUDED.data_types,
                start_date = EXCLUDED.start_date,
                settings = EXCLUDED.settings,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.key.symbol)
        .bind(subscription.key.instrument_type.as_str())
        .bind(subscription.key.market_type.as_str())
        .bind(&subscription.broker_id)
        .bind(Json(&subscription.data_types))
        .bind(subscription.start_date)
        .bind(Json(&subscription.settings))
        .bind(subscription.is_active)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>> {
        let pool = self.connector.pool()?;
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(Self::subscription_from_row).transpose()
    }

    async fn list_subscriptions(
        &self,
        broker_id: Option<&str>,
    ) -> StorageResult<Vec<Subscription>> {
        let pool = self.connector.pool()?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE ($1::VARCHAR IS NULL OR broker_id = $1)
            ORDER BY broker_id, symbol
            "#,
        )
        .bind(broker_id)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(Self::subscription_from_row).collect()
    }

    async fn delete_subscription(&self, id: Uuid) -> StorageResult<bool> {
        let pool = self.connector.pool()?;
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_broker_config(&self, config: &BrokerConfig) -> StorageResult<()> {
        let pool = self.connector.pool()?;
        sqlx::query(
            r#"
            INSERT INTO broker_configs (id, name, broker_type, enabled, config, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                broker_type = EXCLUDED.broker_type,
                enabled = EXCLUDED.enabled,
                config = EXCLUDED.config,
                updated_at = NOW()
            "#,
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(config.broker_type.as_str())
        .bind(config.enabled)
        .bind(Json(config))
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_broker_config(&self, id: &str) -> StorageResult<Option<BrokerConfig>> {
        let pool = self.connector.pool()?;
        let row = sqlx::query("SELECT config FROM broker_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(Self::broker_config_from_row).transpose()
    }

    async fn list_broker_configs(&self) -> StorageResult<Vec<BrokerConfig>> {
        let pool = self.connector.pool()?;
        let rows = sqlx::query("SELECT config FROM broker_configs ORDER BY id")
            .fetch_all(&pool)
            .await?;
        rows.iter().map(Self::broker_config_from_row).collect()
    }

    async fn delete_broker_config(&self, id: &str) -> StorageResult<bool> {
        let pool = self.connector.pool()?;
        let result = sqlx::query("DELETE FROM broker_configs WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_common::data::{InstrumentType, MarketType};

    #[test]
    fn test_parse_column_reports_column() {
        let parsed: InstrumentType = parse_column("instrument_type", "spot".to_string()).unwrap();
        assert_eq!(parsed, InstrumentType::Spot);

        let err = parse_column::<MarketType>("market_type", "bonds".to_string()).unwrap_err();
        assert!(err.to_string().contains("market_type"));
    }

    #[tokio::test]
    async fn test_operations_fail_before_connect() {
        let storage =
            PostgresMetadataStorage::new(DatabaseSettings::new("postgresql://localhost/x"));
        assert!(matches!(
            storage.health().await,
            Err(StorageError::NotConnected("metadata"))
        ));
        assert!(storage.list_broker_configs().await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a PostgreSQL instance
    async fn test_instrument_round_trip_against_database() {
        dotenv::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let storage = PostgresMetadataStorage::new(DatabaseSettings::new(url));
        storage.connect().await.unwrap();
        storage.migrate().await.unwrap();

        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let instrument = Instrument {
            created_at: now,
            updated_at: now,
            ..Instrument::new("TESTUSDT", InstrumentType::Spot, MarketType::Crypto)
                .with_assets("TEST", "USDT")
        };
        storage.save_instrument(&instrument).await.unwrap();

        let loaded = storage.get_instrument("TESTUSDT").await.unwrap();
        assert_eq!(loaded, Some(instrument));
        assert!(storage.delete_instrument("TESTUSDT").await.unwrap());
        storage.disconnect().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a PostgreSQL instance
    async fn test_subscription_requires_instrument_against_database() {
        dotenv::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let storage = PostgresMetadataStorage::new(DatabaseSettings::new(url));
        storage.connect().await.unwrap();
        storage.migrate().await.unwrap();

        let symbol = format!("FK{}", &Uuid::new_v4().simple().to_string()[..8]).to_uppercase();
        let subscription =
            Subscription::new(InstrumentKey::crypto_spot(&symbol), "fk-test", vec![]);

        let err = storage.save_subscription(&subscription).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(sqlx::Error::Database(_))));

        let instrument = Instrument::new(&symbol, InstrumentType::Spot, MarketType::Crypto);
        storage.save_instrument(&instrument).await.unwrap();
        storage.save_subscription(&subscription).await.unwrap();

        // Removing the instrument removes its subscriptions
        assert!(storage.delete_instrument(&symbol).await.unwrap());
        assert_eq!(storage.get_subscription(subscription.id).await.unwrap(), None);
        storage.disconnect().await.unwrap();
    }
}
