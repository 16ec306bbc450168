//! SurrealDB schema initialization

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all snipline tables. Safe to call repeatedly.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing snipline SurrealDB schema");
    init_promotions_table(db).await?;
    init_evictions_table(db).await?;
    info!("snipline schema initialization complete");
    Ok(())
}

/// Initialize `promotions` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE promotions {
///   seq:            INT (unique, ledger order)
///   staging_id:     STRING (unique)
///   content_hash:   STRING (indexed)
///   engine_code:    STRING
///   position:       INT
///   label:          STRING
///   promoted_at:    DATETIME
///   ...
/// }
/// ```
///
/// Rows are append-only: updates and deletes are not permitted.
async fn init_promotions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing promotions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS promotions
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_seq ON TABLE promotions COLUMNS seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_staging_id ON TABLE promotions COLUMNS staging_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_slot ON TABLE promotions COLUMNS engine_code, position;
        DEFINE INDEX IF NOT EXISTS idx_content ON TABLE promotions COLUMNS engine_code, content_hash;
    "#;

    db.query(sql).await?.check()?;
    info!("promotions table initialized");
    Ok(())
}

/// Initialize `evictions` table
///
/// Schema:
/// ```text
/// TABLE evictions {
///   staging_id:   STRING (indexed)
///   engine_code:  STRING
///   position:     INT
///   label:        STRING
///   evicted_at:   DATETIME
/// }
/// ```
async fn init_evictions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing evictions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS evictions
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_evicted_staging_id ON TABLE evictions COLUMNS staging_id;
    "#;

    db.query(sql).await?.check()?;
    info!("evictions table initialized");
    Ok(())
}
