//! SQLite sample store for Atmos.
//!
//! Holds only the most recent ingestion (one series per signal) and the single
//! current location. Each ingestion replaces the stored series wholesale, so
//! the store never grows into a history.

use chrono::{TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::model::{Location, PollutantKind, PollutantSeries, RawReadings, Sample};

/// Key used for the humidity series in the `samples` table.
const HUMIDITY_KEY: &str = "HUMIDITY";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:atmos.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database sees its own empty database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                signal TEXT NOT NULL,
                position INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (signal, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Single-row table: id is pinned to 1
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS location (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                city TEXT,
                region TEXT,
                country TEXT,
                source_ip TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace every stored series with the given readings.
    ///
    /// Runs in one transaction, so a reader never sees a mix of two ingestions.
    pub async fn replace_readings(&self, raw: &RawReadings) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM samples").execute(&mut *tx).await?;

        let series = raw
            .pollutants
            .iter()
            .map(|(kind, series)| (kind.label(), series))
            .chain(raw.humidity.iter().map(|series| (HUMIDITY_KEY, series)));

        for (signal, samples) in series {
            for (position, sample) in samples.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO samples (signal, position, ts, value)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(signal)
                .bind(position as i64)
                .bind(sample.timestamp.timestamp_millis())
                .bind(sample.value)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load the readings of the last ingestion, in their original order.
    ///
    /// Rows with an unknown signal or an out-of-range timestamp are skipped.
    pub async fn load_readings(&self) -> Result<RawReadings> {
        let rows = sqlx::query(
            r#"
            SELECT signal, ts, value
            FROM samples
            ORDER BY signal, position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut raw = RawReadings::default();
        for row in rows {
            let signal: String = row.get("signal");
            let ts: i64 = row.get("ts");
            let value: f64 = row.get("value");

            let Some(timestamp) = Utc.timestamp_millis_opt(ts).single() else {
                continue;
            };
            let sample = Sample::new(timestamp, value);

            if signal == HUMIDITY_KEY {
                raw.humidity.get_or_insert_with(PollutantSeries::new).push(sample);
            } else if let Some(kind) = pollutant_from_label(&signal) {
                raw.pollutants.entry(kind).or_default().push(sample);
            }
        }

        Ok(raw)
    }

    /// Persist the current location, replacing any previous one.
    pub async fn save_location(&self, location: &Location) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO location
                (id, name, latitude, longitude, city, region, country, source_ip)
            VALUES (1, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&location.name)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.city)
        .bind(&location.region)
        .bind(&location.country)
        .bind(&location.source_ip)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the persisted location, if any.
    pub async fn load_location(&self) -> Result<Option<Location>> {
        let row = sqlx::query(
            r#"
            SELECT name, latitude, longitude, city, region, country, source_ip
            FROM location
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Location {
            name: r.get("name"),
            latitude: r.get("latitude"),
            longitude: r.get("longitude"),
            city: r.get("city"),
            region: r.get("region"),
            country: r.get("country"),
            source_ip: r.get("source_ip"),
        }))
    }
}

fn pollutant_from_label(label: &str) -> Option<PollutantKind> {
    PollutantKind::ALL.into_iter().find(|kind| kind.label() == label)
}
