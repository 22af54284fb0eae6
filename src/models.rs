use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One curriculum entry, loaded wholesale at startup. Immutable at runtime
/// except through a bulk administrative reload.
#[derive(Serialize, Clone)]
pub struct LearningItem {
    pub identifier: String,
    pub subject: String,
    pub grade: i64,
    pub learning_objective: String,
    pub learning_prompt: String,
    pub keywords: Vec<String>,
    pub difficulty: String,
    pub content_types: serde_json::Value,
    pub total_goals: usize,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbLearningItem {
    pub identifier: Option<String>,
    pub subject: Option<String>,
    pub grade: Option<i64>,
    pub learning_objective: Option<String>,
    pub learning_prompt: Option<String>,
    pub keywords: Option<String>,
    pub difficulty: Option<String>,
    pub content_types: Option<String>,
}

/// The `progressTracking` section inside `content_types`, carrying the three
/// goal checklists whose entries map 1:1 to progress goal_index slots.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTracking {
    #[serde(default)]
    pub beginner_goals: Vec<String>,
    #[serde(default)]
    pub intermediate_goals: Vec<String>,
    #[serde(default)]
    pub advanced_goals: Vec<String>,
}

impl ProgressTracking {
    pub fn total_goals(&self) -> usize {
        self.beginner_goals.len() + self.intermediate_goals.len() + self.advanced_goals.len()
    }
}

#[derive(Serialize, Clone)]
pub struct ProgressRecord {
    pub id: i64,
    pub user_id: i64,
    pub item_identifier: String,
    pub level: String,
    pub goal_index: i64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbProgressRecord {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub item_identifier: Option<String>,
    pub level: Option<String>,
    pub goal_index: Option<i64>,
    pub completed: Option<bool>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbProgressRecord> for ProgressRecord {
    fn from(db: DbProgressRecord) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            item_identifier: db.item_identifier.unwrap_or_default(),
            level: db.level.unwrap_or_default(),
            goal_index: db.goal_index.unwrap_or_default(),
            completed: db.completed.unwrap_or_default(),
            updated_at: db
                .updated_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}
