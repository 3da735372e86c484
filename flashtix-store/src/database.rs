use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use serde_json::Value;

use crate::app_config::ReservationSettings;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays operator-tuned values from `reservation_settings` on top of
    /// the file/env configuration.
    pub async fn fetch_reservation_settings(&self, defaults: ReservationSettings) -> Result<ReservationSettings, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT setting_key, setting_value FROM reservation_settings")
            .fetch_all(&self.pool)
            .await?;

        Ok(apply_overrides(defaults, rows))
    }
}

// Expected row format: {"value": <number>}
fn apply_overrides(defaults: ReservationSettings, rows: Vec<(String, Value)>) -> ReservationSettings {
    let mut settings = defaults;

    for (key, value) in rows {
        let Some(v) = value.get("value").and_then(Value::as_u64) else {
            continue;
        };
        match key.as_str() {
            "hold_seconds" => settings.hold_seconds = v,
            "reconcile_interval_seconds" => settings.reconcile_interval_seconds = v,
            "reconcile_batch_size" => settings.reconcile_batch_size = v as usize,
            "store_deadline_seconds" => settings.store_deadline_seconds = v,
            other => info!("Ignoring unknown reservation setting: {}", other),
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides_apply_known_keys() {
        let rows = vec![
            ("hold_seconds".to_string(), json!({"value": 120})),
            ("reconcile_batch_size".to_string(), json!({"value": 50})),
            ("store_deadline_seconds".to_string(), json!({"value": "fast"})),
            ("unknown".to_string(), json!({"value": 1})),
        ];
        let settings = apply_overrides(ReservationSettings::default(), rows);

        assert_eq!(settings.hold_seconds, 120);
        assert_eq!(settings.reconcile_batch_size, 50);
        assert_eq!(settings.store_deadline_seconds, 10); // non-numeric value ignored
    }
}
