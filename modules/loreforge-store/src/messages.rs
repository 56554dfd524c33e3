use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use loreforge_common::ChatMessage;

/// Chat history per `(user, campaign)`, in insertion order.
#[derive(Clone)]
pub struct MessageStore {
    pool: PgPool,
}

impl MessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, user_id, campaign_id, role, content, agent_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.campaign_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&message.agent_type)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, user_id: &str, campaign_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_messages
            WHERE user_id = $1 AND campaign_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }
}

fn row_to_message(row: &PgRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        campaign_id: row.try_get("campaign_id")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        agent_type: row.try_get("agent_type")?,
        created_at: row.try_get("created_at")?,
    })
}
