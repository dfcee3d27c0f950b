use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, OutboxRow, ProcessedEvent, Result,
    Version,
    outbox::OutboxStore,
    processed::ProcessedEventStore,
    store::{EventStore, validate_batch},
};

/// PostgreSQL-backed event log with co-transactional outbox rows.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("created_at")?,
            payload: row.try_get("event_data")?,
            metadata,
        })
    }

    /// Maps a unique-constraint violation onto the event-log error kinds.
    fn map_insert_error(e: sqlx::Error, event: &EventEnvelope) -> EventStoreError {
        if let sqlx::Error::Database(ref db_err) = e {
            match db_err.constraint() {
                Some("events_aggregate_version_key") => {
                    return EventStoreError::VersionConflict {
                        aggregate_id: event.aggregate_id,
                        version: event.version,
                    };
                }
                Some("events_event_id_key") | Some("outbox_event_id_key") => {
                    return EventStoreError::Duplicate(event.event_id);
                }
                _ => {}
            }
        }
        EventStoreError::Database(e)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<()> {
        validate_batch(&events)?;

        let mut tx = self.pool.begin().await?;

        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (event_id, aggregate_id, aggregate_type, event_type, event_data, metadata, version, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(metadata_json)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::map_insert_error(e, event))?;

            // Mirror row: the relay publishes the full envelope verbatim.
            let envelope_json = serde_json::to_value(event)?;

            sqlx::query(
                r#"
                INSERT INTO outbox (event_id, aggregate_id, event_type, event_data, published, created_at)
                VALUES ($1, $2, $3, $4, FALSE, $5)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.event_type)
            .bind(envelope_json)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::map_insert_error(e, event))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_data, metadata, version, created_at
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn load_from_version(
        &self,
        aggregate_id: AggregateId,
        min_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type, event_data, metadata, version, created_at
            FROM events
            WHERE aggregate_id = $1 AND version >= $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(min_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl OutboxStore for PostgresEventStore {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, aggregate_id, event_type, event_data, published, published_at, created_at
            FROM outbox
            WHERE published = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OutboxRow {
                    id: row.try_get("id")?,
                    event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
                    aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("event_data")?,
                    published: row.try_get("published")?,
                    published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE outbox
            SET published = TRUE, published_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresEventStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn mark_processed(
        &self,
        event_id: EventId,
        aggregate_id: AggregateId,
        event_type: &str,
        processed_by: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, aggregate_id, event_type, processed_by, processed_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .bind(event_type)
        .bind(processed_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn processed_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<ProcessedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, event_type, processed_by, processed_at
            FROM processed_events
            WHERE aggregate_id = $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProcessedEvent {
                    event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
                    aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                    event_type: row.try_get("event_type")?,
                    processed_by: row.try_get("processed_by")?,
                    processed_at: row.try_get("processed_at")?,
                })
            })
            .collect()
    }
}
