use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult, QueryFilter, QueryOrder,
    QuerySelect, Select, Set, TransactionTrait,
};
use serde_json::{Map, Value};
use tracing::warn;

use crate::entity::audio_file;

/// Scalar tags stored with every record.
pub type Tags = Map<String, Value>;

/// Metadata of a stored audio file. Never carries the payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: i32,
    pub stored_name: String,
    pub tags: Tags,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn tag_str(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(Value::as_str)
    }
}

/// A record together with its inline payload, if it has one.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub record: FileRecord,
    pub file_data: Option<Vec<u8>>,
}

/// Values for a new row. `id` and `created_at` are assigned by the database.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub stored_name: String,
    pub tags: Tags,
    pub file_url: Option<String>,
    pub file_data: Option<Vec<u8>>,
}

/// Inclusive `created_at` bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[error("start_time must not be later than end_time")]
pub struct InvertedRange;

impl TimeRange {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, InvertedRange> {
        if let (Some(s), Some(e)) = (start, end)
            && s > e
        {
            return Err(InvertedRange);
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| at >= s) && self.end.is_none_or(|e| at <= e)
    }
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert in a dedicated transaction, rolled back on failure.
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord, DbErr>;

    /// Records inside `range`, newest first (ties broken by id, descending).
    async fn list(&self, range: TimeRange) -> Result<Vec<FileRecord>, DbErr>;

    async fn get(&self, id: i32) -> Result<Option<FileRecord>, DbErr>;

    /// Returns `false` when no row had this id.
    async fn delete(&self, id: i32) -> Result<bool, DbErr>;

    async fn find_by_stored_name(&self, stored_name: &str) -> Result<Option<StoredFile>, DbErr>;
}

#[derive(Debug, FromQueryResult)]
struct RecordRow {
    id: i32,
    stored_name: String,
    tags: Value,
    file_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for FileRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            stored_name: row.stored_name,
            tags: into_tags(row.tags),
            file_url: row.file_url,
            created_at: row.created_at,
        }
    }
}

impl From<audio_file::Model> for StoredFile {
    fn from(model: audio_file::Model) -> Self {
        Self {
            record: FileRecord {
                id: model.id,
                stored_name: model.stored_name,
                tags: into_tags(model.tags),
                file_url: model.file_url,
                created_at: model.created_at,
            },
            file_data: model.file_data,
        }
    }
}

fn into_tags(value: Value) -> Tags {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Select every column except the payload.
fn metadata_columns(select: Select<audio_file::Entity>) -> Select<audio_file::Entity> {
    select.select_only().columns([
        audio_file::Column::Id,
        audio_file::Column::StoredName,
        audio_file::Column::Tags,
        audio_file::Column::FileUrl,
        audio_file::Column::CreatedAt,
    ])
}

/// Fail `operation` with a `DbErr` once `limit` elapses.
async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, DbErr>>,
) -> Result<T, DbErr> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DbErr::Custom(format!(
            "{operation} timed out after {}s",
            limit.as_secs()
        ))),
    }
}

pub struct SeaOrmFileRepository {
    db: DatabaseConnection,
    timeout: Duration,
}

impl SeaOrmFileRepository {
    /// `timeout` bounds each call, including connection checkout.
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn insert_in_txn(&self, record: NewFileRecord) -> Result<FileRecord, DbErr> {
        let txn = self.db.begin().await?;

        let model = audio_file::ActiveModel {
            stored_name: Set(record.stored_name),
            tags: Set(Value::Object(record.tags)),
            file_url: Set(record.file_url),
            file_data: Set(record.file_data),
            ..Default::default()
        };

        match audio_file::Entity::insert(model).exec_with_returning(&txn).await {
            Ok(inserted) => {
                txn.commit().await?;
                Ok(StoredFile::from(inserted).record)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed insert also failed");
                }
                Err(err)
            }
        }
    }

    async fn list_rows(&self, range: TimeRange) -> Result<Vec<FileRecord>, DbErr> {
        let mut select = audio_file::Entity::find();
        if let Some(start) = range.start {
            select = select.filter(audio_file::Column::CreatedAt.gte(start));
        }
        if let Some(end) = range.end {
            select = select.filter(audio_file::Column::CreatedAt.lte(end));
        }

        let rows = metadata_columns(select)
            .order_by_desc(audio_file::Column::CreatedAt)
            .order_by_desc(audio_file::Column::Id)
            .into_model::<RecordRow>()
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(FileRecord::from).collect())
    }
}

#[async_trait]
impl FileRepository for SeaOrmFileRepository {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord, DbErr> {
        bounded(self.timeout, "insert", self.insert_in_txn(record)).await
    }

    async fn list(&self, range: TimeRange) -> Result<Vec<FileRecord>, DbErr> {
        bounded(self.timeout, "list", self.list_rows(range)).await
    }

    async fn get(&self, id: i32) -> Result<Option<FileRecord>, DbErr> {
        let row = bounded(
            self.timeout,
            "get",
            metadata_columns(audio_file::Entity::find_by_id(id))
                .into_model::<RecordRow>()
                .one(&self.db),
        )
        .await?;
        Ok(row.map(FileRecord::from))
    }

    async fn delete(&self, id: i32) -> Result<bool, DbErr> {
        let result = bounded(
            self.timeout,
            "delete",
            audio_file::Entity::delete_by_id(id).exec(&self.db),
        )
        .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find_by_stored_name(&self, stored_name: &str) -> Result<Option<StoredFile>, DbErr> {
        let model = bounded(
            self.timeout,
            "find_by_stored_name",
            audio_file::Entity::find()
                .filter(audio_file::Column::StoredName.eq(stored_name))
                .one(&self.db),
        )
        .await?;
        Ok(model.map(StoredFile::from))
    }
}
