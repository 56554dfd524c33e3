use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use loreforge_common::{FileRecord, FileStatus};

#[derive(Clone)]
pub struct FileStore {
    pool: PgPool,
}

impl FileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, file: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, owner_id, key, name, size, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&file.id)
        .bind(&file.owner_id)
        .bind(&file.key)
        .bind(&file.name)
        .bind(file.size)
        .bind(file.status.to_string())
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_file(&r)).transpose()
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_file(&r)).transpose()
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM files WHERE owner_id = $1 ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_file).collect()
    }

    pub async fn rename(&self, key: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE files SET name = $2, updated_at = now() WHERE key = $1")
            .bind(key)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, key: &str, status: FileStatus) -> Result<()> {
        sqlx::query("UPDATE files SET status = $2, updated_at = now() WHERE key = $1")
            .bind(key)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_file(row: &PgRow) -> Result<FileRecord> {
    let status: String = row.try_get("status")?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        size: row.try_get("size")?,
        status: status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
