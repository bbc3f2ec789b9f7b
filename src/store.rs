use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messages::Shape;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("room slug already taken")]
    SlugTaken,
    #[error("invalid shape payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRow {
    pub id: i64,
    pub room_id: i64,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeRow {
    pub id: i64,
    pub room_id: i64,
    pub user_id: String,
    pub shape: Shape,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRow {
    pub id: i64,
    pub slug: String,
    pub admin_id: String,
    pub created_at: DateTime<Utc>,
}

// Durable storage for rooms, chat messages and shapes. The sync core only
// appends and updates by id; deletion exists solely as the room cascade on
// the CRUD surface. Implementations provide row-level atomicity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_chat(
        &self,
        room_id: i64,
        user_id: &str,
        message: &str,
    ) -> Result<ChatRow, StoreError>;

    async fn create_shape(
        &self,
        room_id: i64,
        user_id: &str,
        shape: &Shape,
    ) -> Result<ShapeRow, StoreError>;

    // Rewrites only the geometry of an existing shape. No upsert: an
    // unknown id is `NotFound`.
    async fn update_shape(&self, id: i64, shape: &Shape) -> Result<ShapeRow, StoreError>;

    // Replay order is creation order.
    async fn shapes_for_room(&self, room_id: i64) -> Result<Vec<ShapeRow>, StoreError>;

    // Most recent `limit` messages, returned oldest-first.
    async fn chats_for_room(&self, room_id: i64, limit: i64) -> Result<Vec<ChatRow>, StoreError>;

    async fn create_room(&self, slug: &str, admin_id: &str) -> Result<RoomRow, StoreError>;

    async fn room_by_id(&self, id: i64) -> Result<RoomRow, StoreError>;

    async fn room_by_slug(&self, slug: &str) -> Result<RoomRow, StoreError>;

    async fn rooms_for_admin(&self, admin_id: &str) -> Result<Vec<RoomRow>, StoreError>;

    async fn delete_room(&self, slug: &str, admin_id: &str) -> Result<(), StoreError>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        admin_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS shapes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        shape TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ShapeRecord {
    id: i64,
    room_id: i64,
    user_id: String,
    shape: String,
    created_at: DateTime<Utc>,
}

impl ShapeRecord {
    fn into_row(self) -> Result<ShapeRow, StoreError> {
        Ok(ShapeRow {
            id: self.id,
            room_id: self.room_id,
            user_id: self.user_id,
            shape: serde_json::from_str(&self.shape)?,
            created_at: self.created_at,
        })
    }
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);

        // SQLite takes a single writer anyway; one pooled connection avoids
        // busy errors and keeps `:memory:` databases coherent.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(SqliteStore { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_chat(
        &self,
        room_id: i64,
        user_id: &str,
        message: &str,
    ) -> Result<ChatRow, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chats (room_id, user_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(message)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ChatRow {
            id: result.last_insert_rowid(),
            room_id,
            user_id: user_id.to_string(),
            message: message.to_string(),
            created_at,
        })
    }

    async fn create_shape(
        &self,
        room_id: i64,
        user_id: &str,
        shape: &Shape,
    ) -> Result<ShapeRow, StoreError> {
        let created_at = Utc::now();
        let payload = serde_json::to_string(shape)?;
        let result = sqlx::query(
            "INSERT INTO shapes (room_id, user_id, shape, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(&payload)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ShapeRow {
            id: result.last_insert_rowid(),
            room_id,
            user_id: user_id.to_string(),
            shape: shape.clone(),
            created_at,
        })
    }

    async fn update_shape(&self, id: i64, shape: &Shape) -> Result<ShapeRow, StoreError> {
        let payload = serde_json::to_string(shape)?;
        let result = sqlx::query("UPDATE shapes SET shape = ?1 WHERE id = ?2")
            .bind(&payload)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let record = sqlx::query_as::<_, ShapeRecord>(
            "SELECT id, room_id, user_id, shape, created_at FROM shapes WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        record.into_row()
    }

    async fn shapes_for_room(&self, room_id: i64) -> Result<Vec<ShapeRow>, StoreError> {
        let records = sqlx::query_as::<_, ShapeRecord>(
            "SELECT id, room_id, user_id, shape, created_at FROM shapes
             WHERE room_id = ?1 ORDER BY id ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(ShapeRecord::into_row).collect()
    }

    async fn chats_for_room(&self, room_id: i64, limit: i64) -> Result<Vec<ChatRow>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct ChatRecord {
            id: i64,
            room_id: i64,
            user_id: String,
            message: String,
            created_at: DateTime<Utc>,
        }

        let records = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, room_id, user_id, message, created_at FROM chats
             WHERE room_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut rows: Vec<ChatRow> = records
            .into_iter()
            .map(|r| ChatRow {
                id: r.id,
                room_id: r.room_id,
                user_id: r.user_id,
                message: r.message,
                created_at: r.created_at,
            })
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn create_room(&self, slug: &str, admin_id: &str) -> Result<RoomRow, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO rooms (slug, admin_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(slug)
        .bind(admin_id)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => Ok(RoomRow {
                id: result.last_insert_rowid(),
                slug: slug.to_string(),
                admin_id: admin_id.to_string(),
                created_at,
            }),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::SlugTaken)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn room_by_id(&self, id: i64) -> Result<RoomRow, StoreError> {
        sqlx::query_as::<_, RoomRecord>(
            "SELECT id, slug, admin_id, created_at FROM rooms WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(RoomRecord::into_row)
        .ok_or(StoreError::NotFound)
    }

    async fn room_by_slug(&self, slug: &str) -> Result<RoomRow, StoreError> {
        sqlx::query_as::<_, RoomRecord>(
            "SELECT id, slug, admin_id, created_at FROM rooms WHERE slug = ?1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .map(RoomRecord::into_row)
        .ok_or(StoreError::NotFound)
    }

    async fn rooms_for_admin(&self, admin_id: &str) -> Result<Vec<RoomRow>, StoreError> {
        let records = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, slug, admin_id, created_at FROM rooms
             WHERE admin_id = ?1 ORDER BY id ASC",
        )
        .bind(admin_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(RoomRecord::into_row).collect())
    }

    async fn delete_room(&self, slug: &str, admin_id: &str) -> Result<(), StoreError> {
        let room = self.room_by_slug(slug).await?;
        if room.admin_id != admin_id {
            // same answer as a missing room; existence is not leaked
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM chats WHERE room_id = ?1")
            .bind(room.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM shapes WHERE room_id = ?1")
            .bind(room.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM rooms WHERE id = ?1")
            .bind(room.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RoomRecord {
    id: i64,
    slug: String,
    admin_id: String,
    created_at: DateTime<Utc>,
}

impl RoomRecord {
    fn into_row(self) -> RoomRow {
        RoomRow {
            id: self.id,
            slug: self.slug,
            admin_id: self.admin_id,
            created_at: self.created_at,
        }
    }
}

// In-memory mirror of the store contract. Used by the test suite and for
// running the server without a database file.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: Vec<RoomRow>,
    chats: Vec<ChatRow>,
    shapes: Vec<ShapeRow>,
    next_room_id: i64,
    next_chat_id: i64,
    next_shape_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_chat(
        &self,
        room_id: i64,
        user_id: &str,
        message: &str,
    ) -> Result<ChatRow, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_chat_id += 1;
        let row = ChatRow {
            id: inner.next_chat_id,
            room_id,
            user_id: user_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        };
        inner.chats.push(row.clone());
        Ok(row)
    }

    async fn create_shape(
        &self,
        room_id: i64,
        user_id: &str,
        shape: &Shape,
    ) -> Result<ShapeRow, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_shape_id += 1;
        let row = ShapeRow {
            id: inner.next_shape_id,
            room_id,
            user_id: user_id.to_string(),
            shape: shape.clone(),
            created_at: Utc::now(),
        };
        inner.shapes.push(row.clone());
        Ok(row)
    }

    async fn update_shape(&self, id: i64, shape: &Shape) -> Result<ShapeRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .shapes
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound)?;
        row.shape = shape.clone();
        Ok(row.clone())
    }

    async fn shapes_for_room(&self, room_id: i64) -> Result<Vec<ShapeRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .shapes
            .iter()
            .filter(|s| s.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn chats_for_room(&self, room_id: i64, limit: i64) -> Result<Vec<ChatRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<ChatRow> = inner
            .chats
            .iter()
            .filter(|c| c.room_id == room_id)
            .rev()
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn create_room(&self, slug: &str, admin_id: &str) -> Result<RoomRow, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.rooms.iter().any(|r| r.slug == slug) {
            return Err(StoreError::SlugTaken);
        }
        inner.next_room_id += 1;
        let row = RoomRow {
            id: inner.next_room_id,
            slug: slug.to_string(),
            admin_id: admin_id.to_string(),
            created_at: Utc::now(),
        };
        inner.rooms.push(row.clone());
        Ok(row)
    }

    async fn room_by_id(&self, id: i64) -> Result<RoomRow, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn room_by_slug(&self, slug: &str) -> Result<RoomRow, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .iter()
            .find(|r| r.slug == slug)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn rooms_for_admin(&self, admin_id: &str) -> Result<Vec<RoomRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rooms
            .iter()
            .filter(|r| r.admin_id == admin_id)
            .cloned()
            .collect())
    }

    async fn delete_room(&self, slug: &str, admin_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .rooms
            .iter()
            .position(|r| r.slug == slug && r.admin_id == admin_id)
            .ok_or(StoreError::NotFound)?;
        let room = inner.rooms.remove(position);
        inner.chats.retain(|c| c.room_id != room.id);
        inner.shapes.retain(|s| s.room_id != room.id);
        Ok(())
    }
}
