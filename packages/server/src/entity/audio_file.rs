use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audio_file")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Generated `{uuid}.flac` name, also the blob key.
    #[sea_orm(unique)]
    pub stored_name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    /// Locator returned by the object or filesystem backend.
    #[sea_orm(column_type = "Text", nullable)]
    pub file_url: Option<String>,

    /// Payload bytes, written only by the inline backend.
    #[serde(skip)]
    pub file_data: Option<Vec<u8>>,

    #[sea_orm(default_expr = "Expr::current_timestamp()")]
    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
