use crate::ai::GeminiClient;
use crate::api::AppConfig;
use crate::content::ContentLibrary;
use crate::db::create_user;
use crate::error::AppError;
use crate::init_rocket;
use chrono::{DateTime, NaiveDate, Utc};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";
pub static TEST_ADMIN_KEY: &str = "test-admin-key";

pub struct TestUser {
    pub email: String,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub free_usage_count: i64,
    pub last_reset_date: Option<NaiveDate>,
}

pub struct TestActivationCode {
    pub code: String,
    pub user_email: String,
    pub is_used: bool,
    pub expires_at: DateTime<Utc>,
}

pub struct TestLearningItem {
    pub identifier: String,
    pub subject: String,
    pub grade: Option<i64>,
    pub keywords: Vec<String>,
    pub content_types: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct TestDbBuilder {
    users: Vec<TestUser>,
    codes: Vec<TestActivationCode>,
    items: Vec<TestLearningItem>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn free_user(self, email: &str, usage: i64) -> Self {
        self.user(TestUser {
            email: email.to_string(),
            is_premium: false,
            premium_expires_at: None,
            free_usage_count: usage,
            last_reset_date: Some(Utc::now().date_naive()),
        })
    }

    pub fn premium_user(self, email: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        self.user(TestUser {
            email: email.to_string(),
            is_premium: true,
            premium_expires_at: expires_at,
            free_usage_count: 0,
            last_reset_date: Some(Utc::now().date_naive()),
        })
    }

    pub fn user(mut self, user: TestUser) -> Self {
        self.users.push(user);
        self
    }

    pub fn activation_code(mut self, code: &str, user_email: &str, expires_at: DateTime<Utc>) -> Self {
        self.codes.push(TestActivationCode {
            code: code.to_string(),
            user_email: user_email.to_string(),
            is_used: false,
            expires_at,
        });
        self
    }

    pub fn learning_item(
        mut self,
        identifier: &str,
        subject: &str,
        goals: (usize, usize, usize),
    ) -> Self {
        let content = json!({
            "progressTracking": {
                "beginnerGoals": vec!["goal"; goals.0],
                "intermediateGoals": vec!["goal"; goals.1],
                "advancedGoals": vec!["goal"; goals.2],
            }
        });
        self.items.push(TestLearningItem {
            identifier: identifier.to_string(),
            subject: subject.to_string(),
            grade: Some(3),
            keywords: vec!["fractions".to_string(), "shapes".to_string()],
            content_types: Some(content),
        });
        self
    }

    pub fn raw_learning_item(mut self, item: TestLearningItem) -> Self {
        self.items.push(item);
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });

        let pool = SqlitePool::connect("sqlite::memory:").await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let mut user_id_map: HashMap<String, i64> = HashMap::new();

        for user in &self.users {
            let user_id = create_user(&pool, &user.email, STANDARD_PASSWORD).await?;

            sqlx::query(
                "UPDATE users
                 SET is_premium = ?, premium_expires_at = ?, free_usage_count = ?, last_reset_date = ?
                 WHERE id = ?",
            )
            .bind(user.is_premium)
            .bind(user.premium_expires_at.map(|dt| dt.naive_utc()))
            .bind(user.free_usage_count)
            .bind(user.last_reset_date)
            .bind(user_id)
            .execute(&pool)
            .await?;

            user_id_map.insert(user.email.clone(), user_id);
        }

        for code in &self.codes {
            sqlx::query(
                "INSERT INTO activation_codes (code, user_email, is_used, expires_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&code.code)
            .bind(&code.user_email)
            .bind(code.is_used)
            .bind(code.expires_at.naive_utc())
            .execute(&pool)
            .await?;
        }

        for item in &self.items {
            sqlx::query(
                "INSERT INTO learning_items
                 (identifier, subject, grade, learning_objective, learning_prompt, keywords, difficulty, content_types)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.identifier)
            .bind(&item.subject)
            .bind(item.grade)
            .bind("Understand the material")
            .bind("Let's explore this topic together")
            .bind(serde_json::to_string(&item.keywords).unwrap())
            .bind("standard")
            .bind(item.content_types.as_ref().map(|v| v.to_string()))
            .execute(&pool)
            .await?;
        }

        Ok(TestDb { pool, user_id_map })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub user_id_map: HashMap<String, i64>,
}

impl TestDb {
    pub fn user_id(&self, email: &str) -> Option<i64> {
        self.user_id_map.get(email).copied()
    }

    pub async fn load_user(&self, email: &str) -> crate::auth::User {
        crate::db::find_user_by_email(&self.pool, email)
            .await
            .expect("Failed to query user")
            .expect("User not found")
    }

    pub async fn progress_row_count(&self, user_id: i64) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM progress WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count progress rows");
        count
    }
}

pub fn create_standard_builder() -> TestDbBuilder {
    TestDbBuilder::new()
        .free_user("student@example.com", 0)
        .learning_item("MATH-001", "math", (2, 2, 1))
        .learning_item("MATH-002", "math", (1, 1, 1))
        .learning_item("SCI-001", "science", (3, 0, 0))
}

/// Boots a Rocket instance against the test database. The provider base URL
/// points at nothing unless a wiremock server URL is supplied.
pub async fn setup_test_client_with_provider(
    test_db: TestDb,
    provider_base_url: &str,
) -> (Client, TestDb) {
    let library = ContentLibrary::load_with_ttl(&test_db.pool, Duration::from_secs(300))
        .await
        .expect("Failed to load content library");

    let gemini = GeminiClient::with_base_url(
        "test-server-key".to_string(),
        provider_base_url.to_string(),
    );

    let config = AppConfig {
        admin_key: TEST_ADMIN_KEY.to_string(),
    };

    let rocket = init_rocket(test_db.pool.clone(), library, gemini, config).await;

    let client = Client::tracked(rocket)
        .await
        .expect("Failed to build test client");

    (client, test_db)
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    setup_test_client_with_provider(test_db, "http://127.0.0.1:1").await
}

/// Logs in through the API. The tracked client keeps the session cookie for
/// subsequent requests.
pub async fn login_test_user(client: &Client, email: &str, password: &str) {
    let response = client
        .post("/api/login")
        .header(ContentType::JSON)
        .body(
            json!({
                "email": email,
                "password": password
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok, "Login request failed");
}
