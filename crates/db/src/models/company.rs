use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub primary_brand_id: Option<i64>, // Promoted from the first brand of a project
    pub folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Brand {
    pub id: i64,
    pub company_id: Option<i64>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(
            r#"SELECT id, name, primary_brand_id, folder_path, created_at, updated_at
               FROM companies
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(pool: &SqlitePool, name: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Company>(
            r#"INSERT INTO companies (name)
               VALUES ($1)
               RETURNING id, name, primary_brand_id, folder_path, created_at, updated_at"#,
        )
        .bind(name)
        .fetch_one(pool)
        .await
    }
}

impl Brand {
    pub async fn create(
        pool: &SqlitePool,
        company_id: Option<i64>,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Brand>(
            r#"INSERT INTO brands (company_id, name)
               VALUES ($1, $2)
               RETURNING id, company_id, name, created_at"#,
        )
        .bind(company_id)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    /// Brands linked to a project through `project_brands`.
    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Brand>(
            r#"SELECT b.id, b.company_id, b.name, b.created_at
               FROM brands b
               JOIN project_brands pb ON pb.brand_id = b.id
               WHERE pb.project_id = $1
               ORDER BY pb.rowid ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }
}
