use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use postgres_types::ToSql;
use tokio_postgres::{Client, Error, NoTls, Row};
use tracing::{error, info};

use crate::{
    database::{
        db_structs::{MatchOutcome, RatedEntity},
        store::{EntityStore, OutcomeStore}
    },
    error::StoreError,
    model::structures::{entity_class::EntityClass, match_result::RecordedResult}
};

/// PostgreSQL implementation of the entity and outcome stores.
#[derive(Clone)]
pub struct DbClient {
    client: Arc<Client>
}

impl DbClient {
    // Connect to the database and return a DbClient instance
    pub async fn connect(connection_str: &str) -> Result<Self, Error> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        info!("Database connection established");

        Ok(DbClient {
            client: Arc::new(client)
        })
    }

    fn entity_from_row(row: &Row) -> Result<RatedEntity, StoreError> {
        let class = EntityClass::try_from(row.get::<_, i32>("class"))
            .map_err(|_| StoreError::Backend(format!("unknown entity class {}", row.get::<_, i32>("class"))))?;

        Ok(RatedEntity {
            id: row.get("entity_id"),
            class,
            rating: row.get("rating"),
            deviation: row.get("deviation"),
            volatility: row.get("volatility"),
            matches_played: row.get("matches_played"),
            wins: row.get("wins"),
            banned: row.get("banned"),
            version: row.get("version")
        })
    }

    fn outcome_from_row(row: &Row) -> Result<MatchOutcome, StoreError> {
        let subject_class = EntityClass::try_from(row.get::<_, i32>("subject_class"))
            .map_err(|_| StoreError::Backend("unknown subject class".to_string()))?;
        let counterpart_class = EntityClass::try_from(row.get::<_, i32>("counterpart_class"))
            .map_err(|_| StoreError::Backend("unknown counterpart class".to_string()))?;
        let result = RecordedResult::try_from(row.get::<_, i32>("result"))
            .map_err(|_| StoreError::Backend("unknown match result".to_string()))?;

        Ok(MatchOutcome {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            subject_class,
            counterpart_id: row.get("counterpart_id"),
            counterpart_class,
            result,
            processed: row.get("processed"),
            timestamp: row.get("created_at")
        })
    }
}

fn backend(e: Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl EntityStore for DbClient {
    async fn load(&self, class: EntityClass, id: i32) -> Result<RatedEntity, StoreError> {
        let class_param = class as i32;
        let row = self
            .client
            .query_opt(
                "SELECT entity_id, class, rating, deviation, volatility, matches_played, wins, banned, version
                 FROM rated_entities
                 WHERE class = $1 AND entity_id = $2",
                &[&class_param, &id]
            )
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Self::entity_from_row(&row),
            None => Err(StoreError::NotFound)
        }
    }

    async fn store(&self, entity: &RatedEntity) -> Result<(), StoreError> {
        let class_param = entity.class as i32;
        let params: Vec<&(dyn ToSql + Sync)> = vec![
            &class_param,
            &entity.id,
            &entity.rating,
            &entity.deviation,
            &entity.volatility,
            &entity.matches_played,
            &entity.wins,
            &entity.version,
        ];
        let updated = self
            .client
            .execute(
                "UPDATE rated_entities
                 SET rating = $3, deviation = $4, volatility = $5,
                     matches_played = $6, wins = $7, version = version + 1
                 WHERE class = $1 AND entity_id = $2 AND version = $8",
                &params
            )
            .await
            .map_err(backend)?;

        // Zero rows means another writer got there first
        if updated == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(())
    }

    async fn list_eligible(&self, class: EntityClass) -> Result<Vec<RatedEntity>, StoreError> {
        let class_param = class as i32;
        let rows = self
            .client
            .query(
                "SELECT entity_id, class, rating, deviation, volatility, matches_played, wins, banned, version
                 FROM rated_entities
                 WHERE class = $1 AND banned = FALSE
                 ORDER BY entity_id",
                &[&class_param]
            )
            .await
            .map_err(backend)?;

        rows.iter().map(Self::entity_from_row).collect()
    }
}

#[async_trait]
impl OutcomeStore for DbClient {
    async fn list_unprocessed(
        &self,
        before: DateTime<FixedOffset>
    ) -> Result<Vec<MatchOutcome>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT id, subject_id, subject_class, counterpart_id, counterpart_class, result, processed, created_at
                 FROM match_outcomes
                 WHERE processed = FALSE AND created_at <= $1
                 ORDER BY id",
                &[&before]
            )
            .await
            .map_err(backend)?;

        rows.iter().map(Self::outcome_from_row).collect()
    }

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError> {
        let updated = self
            .client
            .execute("UPDATE match_outcomes SET processed = TRUE WHERE id = $1", &[&id])
            .await
            .map_err(backend)?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }
}
