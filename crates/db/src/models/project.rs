use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use super::company::Company;

#[derive(
    Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "project_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    Paused,
    Delivered,
    Archived,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: i64,
    pub company_id: Option<i64>, // Foreign key to Company
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProject {
    pub company_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

impl Project {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(
            r#"SELECT id, company_id, name, description, status, folder_path, created_at, updated_at
               FROM projects
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateProject) -> Result<Self, sqlx::Error> {
        let status = data.status.clone().unwrap_or_default();
        sqlx::query_as::<_, Project>(
            r#"INSERT INTO projects (company_id, name, description, status)
               VALUES ($1, $2, $3, $4)
               RETURNING id, company_id, name, description, status, folder_path, created_at, updated_at"#,
        )
        .bind(data.company_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(status)
        .fetch_one(pool)
        .await
    }

    pub async fn parent_company(&self, pool: &SqlitePool) -> Result<Option<Company>, sqlx::Error> {
        match self.company_id {
            Some(company_id) => Company::find_by_id(pool, company_id).await,
            None => Ok(None),
        }
    }
}
