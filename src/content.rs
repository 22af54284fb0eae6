//! In-process cache over the `learning_items` table.
//!
//! All items are loaded once at startup, ordered by identifier ascending.
//! That sort order is the curriculum ordering baked into the identifier
//! scheme and is the canonical ordering everywhere downstream. Subject
//! grouping is cached separately with a 5 minute TTL; the first request
//! after expiry recomputes it from a grouped query so subject display order
//! follows the curriculum (minimum identifier per subject), not the
//! alphabet. Recomputation swaps the cache under a write lock so concurrent
//! readers never observe a torn grouping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{DbLearningItem, LearningItem, ProgressTracking};

const SUBJECT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContentStats {
    pub total_identifiers: usize,
    pub total_goals: usize,
    pub error_count: usize,
}

#[derive(Serialize)]
pub struct SubjectGroup {
    pub subject: String,
    pub items: Vec<LearningItem>,
}

struct SubjectCache {
    groups: Arc<Vec<SubjectGroup>>,
    built_at: Instant,
}

pub struct ContentLibrary {
    items: Vec<LearningItem>,
    index: HashMap<String, usize>,
    stats: ContentStats,
    subject_cache: RwLock<Option<SubjectCache>>,
    ttl: Duration,
}

impl ContentLibrary {
    #[instrument(skip(pool))]
    pub async fn load(pool: &Pool<Sqlite>) -> Result<Self, AppError> {
        Self::load_with_ttl(pool, SUBJECT_CACHE_TTL).await
    }

    pub async fn load_with_ttl(pool: &Pool<Sqlite>, ttl: Duration) -> Result<Self, AppError> {
        let rows = sqlx::query_as::<_, DbLearningItem>(
            "SELECT identifier, subject, grade, learning_objective, learning_prompt,
                    keywords, difficulty, content_types
             FROM learning_items
             ORDER BY identifier ASC",
        )
        .fetch_all(pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut error_count = 0;
        let mut total_goals = 0;

        for row in rows {
            let item = Self::convert_row(row, &mut error_count);
            total_goals += item.total_goals;
            items.push(item);
        }

        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.identifier.clone(), i))
            .collect();

        let stats = ContentStats {
            total_identifiers: items.len(),
            total_goals,
            error_count,
        };

        info!(
            items = stats.total_identifiers,
            goals = stats.total_goals,
            errors = stats.error_count,
            "Learning content loaded"
        );

        Ok(Self {
            items,
            index,
            stats,
            subject_cache: RwLock::new(None),
            ttl,
        })
    }

    fn convert_row(row: DbLearningItem, error_count: &mut usize) -> LearningItem {
        let identifier = row.identifier.unwrap_or_default();

        let keywords = match row.keywords.as_deref() {
            Some(raw) => serde_json::from_str(raw).unwrap_or_default(),
            None => Vec::new(),
        };

        // Parse failures yield zero goals and are tolerated; the item still
        // serves, it just contributes nothing to the goal totals.
        let raw_content = row.content_types.unwrap_or_default();
        let (content_types, total_goals) = match serde_json::from_str::<serde_json::Value>(
            &raw_content,
        ) {
            Ok(value) => {
                let tracking = value
                    .get("progressTracking")
                    .cloned()
                    .map(|v| serde_json::from_value::<ProgressTracking>(v).unwrap_or_default())
                    .unwrap_or_default();
                (value, tracking.total_goals())
            }
            Err(err) => {
                warn!(identifier = %identifier, error = %err, "Failed to parse content_types");
                *error_count += 1;
                (serde_json::Value::Null, 0)
            }
        };

        LearningItem {
            identifier,
            subject: row.subject.unwrap_or_default(),
            // NaN/missing grades become 0 so serialization stays total
            grade: row.grade.unwrap_or_default(),
            learning_objective: row.learning_objective.unwrap_or_default(),
            learning_prompt: row.learning_prompt.unwrap_or_default(),
            keywords,
            difficulty: row.difficulty.unwrap_or_default(),
            content_types,
            total_goals,
        }
    }

    /// Exact-match point lookup. Absence is "not found", never an error.
    pub fn get_by_identifier(&self, identifier: &str) -> Option<&LearningItem> {
        self.index.get(identifier).map(|&i| &self.items[i])
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.items.iter().map(|item| item.identifier.clone()).collect()
    }

    pub fn stats(&self) -> ContentStats {
        self.stats
    }

    /// Items grouped by subject in curriculum order, cached for the TTL.
    pub async fn subject_groups(
        &self,
        pool: &Pool<Sqlite>,
    ) -> Result<Arc<Vec<SubjectGroup>>, AppError> {
        {
            let cache = self
                .subject_cache
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cached) = cache.as_ref() {
                if cached.built_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.groups));
                }
            }
        }

        // Subject display order comes from the store: first curriculum
        // identifier per subject, not subject name.
        let subject_order: Vec<(String,)> = sqlx::query_as(
            "SELECT subject FROM learning_items
             GROUP BY subject
             ORDER BY MIN(identifier) ASC",
        )
        .fetch_all(pool)
        .await?;

        let mut grouped: HashMap<&str, Vec<LearningItem>> = HashMap::new();
        for item in &self.items {
            grouped
                .entry(item.subject.as_str())
                .or_default()
                .push(item.clone());
        }

        let groups: Vec<SubjectGroup> = subject_order
            .into_iter()
            .filter_map(|(subject,)| {
                grouped.remove(subject.as_str()).map(|items| SubjectGroup {
                    subject,
                    items,
                })
            })
            .collect();

        let groups = Arc::new(groups);

        let mut cache = self
            .subject_cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cache = Some(SubjectCache {
            groups: Arc::clone(&groups),
            built_at: Instant::now(),
        });

        Ok(groups)
    }

    pub async fn subjects(&self, pool: &Pool<Sqlite>) -> Result<Vec<String>, AppError> {
        let groups = self.subject_groups(pool).await?;
        Ok(groups.iter().map(|g| g.subject.clone()).collect())
    }
}
