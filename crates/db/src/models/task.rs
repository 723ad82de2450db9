use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;


/// Kanban column a task sits in.
#[derive(
    Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Board column order, left to right.
    pub const COLUMNS: [TaskStatus; 5] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ];
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: i64,
    pub project_id: Option<i64>,   // Foreign key to Project
    pub checklist_id: Option<i64>, // Foreign key to Checklist, the ordering scope
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub cover_media: Option<String>,
    pub order_index: i64,
    pub board_order_index: i64, // Position within the status column
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Checklist {
    pub id: i64,
    pub project_id: Option<i64>,
    pub name: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct BoardColumn {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub project_id: Option<i64>,
    pub checklist_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub order_index: Option<i64>,
    pub board_order_index: Option<i64>,
}

impl CreateTask {
    pub fn in_checklist(project_id: i64, checklist_id: i64, title: &str, order_index: i64) -> Self {
        Self {
            project_id: Some(project_id),
            checklist_id: Some(checklist_id),
            title: title.to_string(),
            description: None,
            status: Some(TaskStatus::Todo),
            order_index: Some(order_index),
            board_order_index: None,
        }
    }

    pub fn on_board(project_id: i64, title: &str, status: TaskStatus, board_order_index: i64) -> Self {
        Self {
            project_id: Some(project_id),
            checklist_id: None,
            title: title.to_string(),
            description: None,
            status: Some(status),
            order_index: None,
            board_order_index: Some(board_order_index),
        }
    }
}

const TASK_COLUMNS: &str = "id, project_id, checklist_id, title, description, status, priority, due_date, cover_media, order_index, board_order_index, created_at, updated_at";

impl Task {
    pub async fn create(pool: &SqlitePool, data: &CreateTask) -> Result<Self, sqlx::Error> {
        let status = data.status.clone().unwrap_or_default();
        let order_index = data.order_index.unwrap_or(0);
        let board_order_index = data.board_order_index.unwrap_or(0);
        sqlx::query_as::<_, Task>(&format!(
            r#"INSERT INTO tasks (project_id, checklist_id, title, description, status, order_index, board_order_index)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(data.project_id)
        .bind(data.checklist_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(status)
        .bind(order_index)
        .bind(board_order_index)
        .fetch_one(pool)
        .await
    }

    /// Tasks of one checklist in display order.
    pub async fn find_by_checklist_id(
        pool: &SqlitePool,
        checklist_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE checklist_id = $1
               ORDER BY order_index ASC, id ASC"#
        ))
        .bind(checklist_id)
        .fetch_all(pool)
        .await
    }

    /// Kanban board for a project: one column per status, each in display order.
    pub async fn board_for_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<BoardColumn>, sqlx::Error> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS}
               FROM tasks
               WHERE project_id = $1
               ORDER BY board_order_index ASC, id ASC"#
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        Ok(TaskStatus::COLUMNS
            .iter()
            .map(|status| BoardColumn {
                status: status.clone(),
                tasks: tasks.iter().filter(|t| &t.status == status).cloned().collect(),
            })
            .collect())
    }
}

impl Checklist {
    pub async fn create(
        pool: &SqlitePool,
        project_id: i64,
        name: &str,
        order_index: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Checklist>(
            r#"INSERT INTO checklists (project_id, name, order_index)
               VALUES ($1, $2, $3)
               RETURNING id, project_id, name, order_index"#,
        )
        .bind(project_id)
        .bind(name)
        .bind(order_index)
        .bind(board_order_index)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Checklist>(
            r#"SELECT id, project_id, name, order_index
               FROM checklists
               WHERE project_id = $1
               ORDER BY board_order_index ASC, id ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }
}
