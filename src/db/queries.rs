use sqlx::types::Json;
use sqlx::{PgPool, Result};

use crate::domain::Transaction;

/// Records a transaction the way the user-facing flows create them, before any webhook
/// arrives for it.
pub async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, amount, charges, currency, transaction_type, transaction_flow,
            status, metadata, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(tx.id)
    .bind(tx.user_id)
    .bind(&tx.amount)
    .bind(&tx.charges)
    .bind(&tx.currency)
    .bind(tx.transaction_type.as_str())
    .bind(tx.transaction_flow.map(|f| f.as_str()))
    .bind(tx.status.as_str())
    .bind(Json(&tx.metadata))
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_applied_migrations(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
}
