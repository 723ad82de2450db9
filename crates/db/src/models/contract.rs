use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

#[derive(
    Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "contract_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Draft,
    Sent,
    Signed,
    Void,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Contract {
    pub id: i64,
    pub company_id: Option<i64>,
    pub project_id: Option<i64>,
    pub title: String,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reusable contract section; linked to contracts in order through `contract_part_links`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ContractPart {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
}

impl Contract {
    pub async fn create(
        pool: &SqlitePool,
        company_id: Option<i64>,
        title: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Contract>(
            r#"INSERT INTO contracts (company_id, title)
               VALUES ($1, $2)
               RETURNING id, company_id, project_id, title, status, created_at, updated_at"#,
        )
        .bind(company_id)
        .bind(title)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Contract>(
            r#"SELECT id, company_id, project_id, title, status, created_at, updated_at
               FROM contracts
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

impl ContractPart {
    pub async fn create(
        pool: &SqlitePool,
        title: &str,
        content: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ContractPart>(
            r#"INSERT INTO contract_parts (title, content)
               VALUES ($1, $2)
               RETURNING id, title, content"#,
        )
        .bind(title)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    /// Parts of a contract in section order.
    pub async fn find_for_contract(
        pool: &SqlitePool,
        contract_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ContractPart>(
            r#"SELECT p.id, p.title, p.content
               FROM contract_parts p
               JOIN contract_part_links l ON l.contract_part_id = p.id
               WHERE l.contract_id = $1
               ORDER BY l.order_index ASC, p.id ASC"#,
        )
        .bind(contract_id)
        .fetch_all(pool)
        .await
    }
}
