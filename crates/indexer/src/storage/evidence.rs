//! Evidence projection storage operations.
//!
//! The free functions take a bare connection so processors can run them
//! inside a transaction; the [`Storage`] methods are read helpers on the pool.

use super::types::{address_from_db, address_to_db, hash_from_db, hash_to_db};
use super::{EvidenceRecord, NewEvidence, StatusUpdate, Storage};
use anyhow::{Context, Result};
use evidence_core::EvidenceStatus;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const EVIDENCE_COLUMNS: &str = r#"
    id, evidence_id, owner_address, file_name, mime_type, file_size,
    file_created_at, hash_algorithm, hash_value, status, block_number, tx_hash,
    block_timestamp, memo, revoked_at, revoker_address, created_at, updated_at
"#;

/// Fetch an evidence row by its ledger identifier.
pub async fn fetch_evidence(
    conn: &mut SqliteConnection,
    evidence_id: &str,
) -> Result<Option<EvidenceRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {EVIDENCE_COLUMNS} FROM evidence WHERE evidence_id = ?"
    ))
    .bind(evidence_id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch evidence")?;

    row.map(row_to_evidence).transpose()
}

/// Insert an evidence row. Returns `false` if the identifier already exists.
pub async fn insert_evidence(conn: &mut SqliteConnection, evidence: &NewEvidence) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO evidence (
            evidence_id, owner_address, file_name, mime_type, file_size,
            file_created_at, hash_algorithm, hash_value, status, block_number,
            tx_hash, block_timestamp, memo, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(evidence_id) DO NOTHING
        "#,
    )
    .bind(&evidence.evidence_id)
    .bind(address_to_db(&evidence.owner))
    .bind(&evidence.file_name)
    .bind(&evidence.mime_type)
    .bind(evidence.file_size as i64)
    .bind(evidence.file_created_at as i64)
    .bind(&evidence.hash_algorithm)
    .bind(hash_to_db(&evidence.hash_value))
    .bind(evidence.status.as_str())
    .bind(evidence.block_number as i64)
    .bind(hash_to_db(&evidence.tx_hash))
    .bind(evidence.block_timestamp as i64)
    .bind(&evidence.memo)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to insert evidence")?;

    Ok(result.rows_affected() > 0)
}

/// Apply a status change. Returns the number of rows touched.
pub async fn update_evidence_status(
    conn: &mut SqliteConnection,
    evidence_id: &str,
    update: &StatusUpdate,
) -> Result<u64> {
    let now = chrono::Utc::now().timestamp();

    let result = match &update.revocation {
        Some((revoked_at, revoker)) => sqlx::query(
            r#"
            UPDATE evidence
            SET status = ?, revoked_at = ?, revoker_address = ?, updated_at = ?
            WHERE evidence_id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(*revoked_at)
        .bind(revoker.as_ref().map(address_to_db))
        .bind(now)
        .bind(evidence_id)
        .execute(&mut *conn)
        .await,
        None => sqlx::query("UPDATE evidence SET status = ?, updated_at = ? WHERE evidence_id = ?")
            .bind(update.status.as_str())
            .bind(now)
            .bind(evidence_id)
            .execute(&mut *conn)
            .await,
    }
    .context("Failed to update evidence status")?;

    Ok(result.rows_affected())
}

impl Storage {
    /// Get an evidence row by its ledger identifier.
    pub async fn find_evidence(&self, evidence_id: &str) -> Result<Option<EvidenceRecord>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        fetch_evidence(&mut conn, evidence_id).await
    }

    /// Count evidence rows, optionally by status.
    pub async fn count_evidence(&self, status: Option<EvidenceStatus>) -> Result<u64> {
        let count: i64 = match status {
            Some(status) => sqlx::query_scalar("SELECT COUNT(*) FROM evidence WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await,
            None => sqlx::query_scalar("SELECT COUNT(*) FROM evidence")
                .fetch_one(&self.pool)
                .await,
        }
        .context("Failed to count evidence")?;

        Ok(count as u64)
    }
}

fn row_to_evidence(row: SqliteRow) -> Result<EvidenceRecord> {
    let status: String = row.get("status");
    let revoker: Option<String> = row.get("revoker_address");

    Ok(EvidenceRecord {
        id: row.get("id"),
        evidence_id: row.get("evidence_id"),
        owner: address_from_db(row.get("owner_address"))?,
        file_name: row.get("file_name"),
        mime_type: row.get("mime_type"),
        file_size: row.get::<i64, _>("file_size") as u64,
        file_created_at: row.get::<i64, _>("file_created_at") as u64,
        hash_algorithm: row.get("hash_algorithm"),
        hash_value: hash_from_db(row.get("hash_value"))?,
        status: status
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid stored evidence status: {}", e))?,
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: hash_from_db(row.get("tx_hash"))?,
        block_timestamp: row.get::<i64, _>("block_timestamp") as u64,
        memo: row.get("memo"),
        revoked_at: row.get("revoked_at"),
        revoker: revoker.as_deref().map(address_from_db).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
