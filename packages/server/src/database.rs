use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

use crate::config::DatabaseConfig;

/// Connect and sync the schema from the registered entities.
pub async fn init_db(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let db = connect(config).await?;
    db.get_schema_registry("server::entity::*")
        .sync(&db)
        .await?;

    Ok(db)
}

/// Open the pool. Every session runs with `statement_timeout` set.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let statement_timeout = format!("{}s", config.statement_timeout_secs);
    let mut opt = ConnectOptions::new(config.url.clone());

    // Set connection pool options
    opt.max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(timeout)
        .acquire_timeout(timeout)
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false)
        .map_sqlx_postgres_opts(move |pg| {
            pg.options([("statement_timeout", statement_timeout.clone())])
        });

    Database::connect(opt).await
}
