use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::client::models::session::{MeetSession, MeetStatus};
use crate::common::geo::Coordinate;
use crate::store::{ChangeRegistry, SessionStore, StoreError, Subscription};

/// SQLite-backed session store. Stands in for the hosted record store in
/// local runs and integration tests; `update_where` semantics here are the
/// reference for every other backend.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    registry: ChangeRegistry,
}

impl SqliteSessionStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        log::info!("[STORE] Connecting to {}", database_url);

        // SQLite will not create missing parent directories itself
        let file_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let file_path = file_path.split('?').next().unwrap_or(file_path);
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                log::info!("[STORE] Created data directory {:?}", parent);
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self {
            pool,
            registry: ChangeRegistry::new(),
        };
        store.migrate().await?;
        log::info!("[STORE] Connected and migrated");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meet_sessions (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                invite_token TEXT NOT NULL,
                sender_lat REAL NOT NULL,
                sender_lng REAL NOT NULL,
                receiver_lat REAL,
                receiver_lng REAL,
                privacy_masked INTEGER NOT NULL DEFAULT 0,
                midpoint_lat REAL,
                midpoint_lng REAL,
                candidate_places TEXT NOT NULL DEFAULT '[]',
                selected_place_id TEXT,
                proposed_place_id TEXT,
                confirmed_place_id TEXT,
                status TEXT NOT NULL,
                search_radius_m INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Direct pool access for inspection tooling and the telemetry logger.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_session(row: &SqliteRow) -> Result<MeetSession, StoreError> {
        let status_str: String = row
            .try_get("status")
            .map_err(|e| StoreError::Backend(e.into()))?;
        let status = MeetStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("unknown status '{}' in store", status_str))
        })?;

        let places_json: String = row
            .try_get("candidate_places")
            .map_err(|e| StoreError::Backend(e.into()))?;
        let candidate_places =
            serde_json::from_str(&places_json).map_err(|e| StoreError::Backend(e.into()))?;

        Ok(MeetSession {
            id: row.try_get("id").map_err(|e| StoreError::Backend(e.into()))?,
            category: row
                .try_get("category")
                .map_err(|e| StoreError::Backend(e.into()))?,
            invite_token: row
                .try_get("invite_token")
                .map_err(|e| StoreError::Backend(e.into()))?,
            sender_location: Coordinate::new(
                row.try_get("sender_lat").map_err(|e| StoreError::Backend(e.into()))?,
                row.try_get("sender_lng").map_err(|e| StoreError::Backend(e.into()))?,
            ),
            receiver_location: pair_to_coord(
                row.try_get("receiver_lat").ok().flatten(),
                row.try_get("receiver_lng").ok().flatten(),
            ),
            privacy_masked: row.try_get::<i64, _>("privacy_masked").unwrap_or(0) != 0,
            midpoint: pair_to_coord(
                row.try_get("midpoint_lat").ok().flatten(),
                row.try_get("midpoint_lng").ok().flatten(),
            ),
            candidate_places,
            selected_place_id: row.try_get("selected_place_id").ok().flatten(),
            proposed_place_id: row.try_get("proposed_place_id").ok().flatten(),
            confirmed_place_id: row.try_get("confirmed_place_id").ok().flatten(),
            status,
            search_radius_m: row
                .try_get::<i64, _>("search_radius_m")
                .map_err(|e| StoreError::Backend(e.into()))? as u32,
            created_at: row
                .try_get("created_at")
                .map_err(|e| StoreError::Backend(e.into()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| StoreError::Backend(e.into()))?,
        })
    }
}

fn pair_to_coord(lat: Option<f64>, lng: Option<f64>) -> Option<Coordinate> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
        _ => None,
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &MeetSession) -> Result<(), StoreError> {
        let places_json = serde_json::to_string(&session.candidate_places)
            .map_err(|e| StoreError::Backend(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO meet_sessions (
                id, category, invite_token,
                sender_lat, sender_lng, receiver_lat, receiver_lng,
                privacy_masked, midpoint_lat, midpoint_lng,
                candidate_places, selected_place_id, proposed_place_id, confirmed_place_id,
                status, search_radius_m, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&session.id)
        .bind(&session.category)
        .bind(&session.invite_token)
        .bind(session.sender_location.latitude)
        .bind(session.sender_location.longitude)
        .bind(session.receiver_location.map(|c| c.latitude))
        .bind(session.receiver_location.map(|c| c.longitude))
        .bind(session.privacy_masked as i64)
        .bind(session.midpoint.map(|c| c.latitude))
        .bind(session.midpoint.map(|c| c.longitude))
        .bind(&places_json)
        .bind(&session.selected_place_id)
        .bind(&session.proposed_place_id)
        .bind(&session.confirmed_place_id)
        .bind(session.status.as_str())
        .bind(session.search_radius_m as i64)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        log::info!("[STORE] Inserted session {} ({})", session.id, session.status);
        self.registry.publish(session).await;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<MeetSession, StoreError> {
        let row = sqlx::query("SELECT * FROM meet_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        match row {
            Some(row) => Self::row_to_session(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn update_where(
        &self,
        expected: MeetStatus,
        session: &MeetSession,
    ) -> Result<(), StoreError> {
        let places_json = serde_json::to_string(&session.candidate_places)
            .map_err(|e| StoreError::Backend(e.into()))?;
        let result = sqlx::query(
            r#"
            UPDATE meet_sessions SET
                receiver_lat = ?, receiver_lng = ?,
                midpoint_lat = ?, midpoint_lng = ?,
                candidate_places = ?,
                selected_place_id = ?, proposed_place_id = ?, confirmed_place_id = ?,
                status = ?, search_radius_m = ?, updated_at = ?
            WHERE id = ? AND status = ?
        "#,
        )
        .bind(session.receiver_location.map(|c| c.latitude))
        .bind(session.receiver_location.map(|c| c.longitude))
        .bind(session.midpoint.map(|c| c.latitude))
        .bind(session.midpoint.map(|c| c.longitude))
        .bind(&places_json)
        .bind(&session.selected_place_id)
        .bind(&session.proposed_place_id)
        .bind(&session.confirmed_place_id)
        .bind(session.status.as_str())
        .bind(session.search_radius_m as i64)
        .bind(session.updated_at)
        .bind(&session.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            // Either the row is gone or another writer advanced it first
            let exists = sqlx::query("SELECT 1 FROM meet_sessions WHERE id = ?")
                .bind(&session.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?
                .is_some();
            return if exists {
                log::info!(
                    "[STORE] Conditional update on session {} lost the race (expected {})",
                    session.id,
                    expected
                );
                Err(StoreError::Conflict)
            } else {
                Err(StoreError::NotFound(session.id.clone()))
            };
        }

        log::info!(
            "[STORE] Session {} advanced {} -> {}",
            session.id,
            expected,
            session.status
        );
        self.registry.publish(session).await;
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Subscription {
        self.registry.register(id).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<MeetSession>, StoreError> {
        let rows = sqlx::query("SELECT * FROM meet_sessions ORDER BY updated_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter().map(Self::row_to_session).collect()
    }
}
