use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::ai::{GeminiClient, PromptContext, build_prompt};
use crate::auth::{User, UserSession};
use crate::content::ContentLibrary;
use crate::db::{authenticate_user, create_user, create_user_session, find_user_by_email, invalidate_session};
use crate::entitlement;
use crate::error::{AppError, FREE_USAGE_LIMIT};
use crate::progress::{ProgressUpdate, batch_upsert_progress, get_progress_for_user, upsert_progress};
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationResponse};

/// Server-held secrets handed to routes through managed state.
pub struct AppConfig {
    pub admin_key: String,
}

impl AppConfig {
    fn require_admin(&self, supplied: &str) -> Result<(), AppError> {
        // Opaque string comparison against the configured shared secret. An
        // unconfigured key rejects everything rather than matching "".
        if !self.admin_key.is_empty() && supplied == self.admin_key {
            Ok(())
        } else {
            Err(AppError::Authorization(
                "Administrator privileges required".to_string(),
            ))
        }
    }
}

// ===== Authentication =====

#[derive(Deserialize, Validate, Clone)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub is_premium: bool,
    pub free_usage_count: i64,
    pub usage_limit: i64,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            is_premium: user.is_premium,
            free_usage_count: user.free_usage_count,
            usage_limit: FREE_USAGE_LIMIT,
        }
    }
}

async fn open_session(
    db: &Pool<Sqlite>,
    cookies: &CookieJar<'_>,
    user_id: i64,
) -> Result<(), AppError> {
    let token = UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(1);

    create_user_session(db, user_id, &token, expires_at.naive_utc()).await?;

    let cookie = Cookie::build(("session_token", token))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::hours(1));
    cookies.add_private(cookie);

    Ok(())
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    let validated = login.validate_custom()?;

    if authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
    {
        if let Some(mut user) = find_user_by_email(db, &validated.email)
            .await
            .validate_custom()?
        {
            // Lapsed premium must be demoted before the client sees the user
            entitlement::refresh_expiry(db, &mut user)
                .await
                .validate_custom()?;

            open_session(db, cookies, user.id).await.validate_custom()?;

            return Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }));
        }
    }

    Ok(Json(LoginResponse {
        success: false,
        user: None,
        error: Some("Incorrect email address or password".to_string()),
    }))
}

#[derive(Deserialize, Validate, Clone)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email address is required"))]
    email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    let validated = registration.validate_custom()?;

    let user_id = create_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?;

    open_session(db, cookies, user_id).await.validate_custom()?;

    let user = crate::db::get_user(db, user_id).await.validate_custom()?;

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Json<Value> {
    let token = cookies
        .get_private("session_token")
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        let _ = invalidate_session(db, &token).await;
    }

    cookies.remove_private(Cookie::build("session_token"));

    Json(json!({ "success": true }))
}

#[get("/current-user")]
pub async fn api_current_user(user: User) -> Json<Value> {
    Json(json!({
        "success": true,
        "user": UserData::from(user),
    }))
}

#[get("/current-user", rank = 2)]
pub fn api_current_user_unauthorized() -> Status {
    Status::Unauthorized
}

// ===== Content =====

#[get("/content")]
pub async fn api_list_content(
    library: &State<ContentLibrary>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    let groups = library.subject_groups(db).await?;
    let subjects: Vec<&str> = groups.iter().map(|g| g.subject.as_str()).collect();

    Ok(Json(json!({
        "success": true,
        "subjects": subjects,
        "content_by_subject": &*groups,
    })))
}

#[get("/subjects")]
pub async fn api_get_subjects(
    library: &State<ContentLibrary>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    let subjects = library.subjects(db).await?;
    Ok(Json(json!({ "success": true, "subjects": subjects })))
}

#[get("/content/<identifier>")]
pub async fn api_get_content(
    identifier: &str,
    library: &State<ContentLibrary>,
) -> Result<Json<Value>, AppError> {
    match library.get_by_identifier(identifier) {
        Some(item) => Ok(Json(json!({ "success": true, "content": item }))),
        None => Err(AppError::NotFound("Content not found".to_string())),
    }
}

#[get("/progress-stats")]
pub async fn api_progress_stats(library: &State<ContentLibrary>) -> Json<Value> {
    let stats = library.stats();
    Json(json!({
        "success": true,
        "totalIdentifiers": stats.total_identifiers,
        "totalGoals": stats.total_goals,
        "cached": true,
    }))
}

// ===== Progress =====

#[get("/progress/<user_id>")]
pub async fn api_get_progress(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    if user.id != user_id {
        return Err(AppError::Authorization(
            "Progress records belong to another user".to_string(),
        ));
    }

    let progress = get_progress_for_user(db, user_id).await?;
    Ok(Json(json!({ "success": true, "progress": progress })))
}

#[post("/progress/update", data = "<update>")]
pub async fn api_update_progress(
    update: Json<ProgressUpdate>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    upsert_progress(db, user.id, &update).await?;
    Ok(Json(json!({ "success": true, "message": "Progress updated" })))
}

#[derive(Deserialize)]
pub struct BatchProgressRequest {
    updates: Vec<ProgressUpdate>,
}

#[post("/progress/batch-update", data = "<batch>")]
pub async fn api_batch_update_progress(
    batch: Json<BatchProgressRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    let updated = batch_upsert_progress(db, user.id, &batch.updates).await?;
    Ok(Json(json!({ "success": true, "updated_count": updated })))
}

// ===== AI generation =====

#[derive(Deserialize)]
pub struct AiGenerateRequest {
    prompt: String,
    #[serde(default)]
    content_type: String,
    context: Option<PromptContext>,
}

#[post("/ai-generate", data = "<request>")]
pub async fn api_ai_generate(
    request: Json<AiGenerateRequest>,
    mut user: User,
    db: &State<Pool<Sqlite>>,
    client: &State<GeminiClient>,
) -> Result<Json<Value>, AppError> {
    if !entitlement::is_within_quota(db, &mut user).await? {
        return Err(AppError::QuotaExceeded {
            usage_count: user.free_usage_count,
        });
    }

    if request.prompt.trim().is_empty() {
        return Err(AppError::Validation("No prompt provided".to_string()));
    }

    if !client.has_key() {
        return Err(AppError::Internal(
            "Server AI credential is not configured".to_string(),
        ));
    }

    let prompt = build_prompt(
        &request.prompt,
        &request.content_type,
        request.context.as_ref(),
    );

    let result = client.generate(&prompt).await?;

    // Charged after a non-empty response; a provider failure above skips it.
    entitlement::record_usage(db, &mut user).await?;

    Ok(Json(json!({
        "success": true,
        "result": result,
        "content_type": request.content_type,
        "timestamp": Utc::now().to_rfc3339(),
        "usage_count": user.free_usage_count,
        "usage_limit": FREE_USAGE_LIMIT,
    })))
}

#[derive(Deserialize)]
pub struct TestApiKeyRequest {
    api_key: String,
}

#[post("/test-api-key", data = "<request>")]
pub async fn api_test_api_key(
    request: Json<TestApiKeyRequest>,
    client: &State<GeminiClient>,
) -> Result<Json<Value>, AppError> {
    if request.api_key.trim().is_empty() {
        return Err(AppError::Validation("No API key provided".to_string()));
    }

    client.validate_api_key(&request.api_key).await?;

    Ok(Json(json!({ "success": true, "message": "API key is valid" })))
}

// ===== Premium entitlement =====

#[derive(Deserialize)]
pub struct ActivatePremiumRequest {
    activation_code: String,
}

#[post("/activate-premium", data = "<request>")]
pub async fn api_activate_premium(
    request: Json<ActivatePremiumRequest>,
    mut user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    if request.activation_code.trim().is_empty() {
        return Err(AppError::Validation(
            "An activation code is required".to_string(),
        ));
    }

    if entitlement::redeem_activation_code(db, &mut user, &request.activation_code).await? {
        Ok(Json(json!({
            "success": true,
            "message": "Premium account activated",
        })))
    } else {
        Err(AppError::Validation(
            "Activation code is invalid or expired".to_string(),
        ))
    }
}

// ===== Admin =====

#[derive(Deserialize)]
pub struct GenerateCodeRequest {
    admin_key: String,
    user_email: String,
    expires_days: Option<i64>,
}

#[post("/generate-activation-code", data = "<request>")]
pub async fn api_generate_activation_code(
    request: Json<GenerateCodeRequest>,
    config: &State<AppConfig>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    config.require_admin(&request.admin_key)?;

    if request.user_email.trim().is_empty() {
        return Err(AppError::Validation(
            "A user email address is required".to_string(),
        ));
    }

    let expires_days = request.expires_days.unwrap_or(365);
    let (code, expires_at) =
        entitlement::generate_activation_code(db, &request.user_email, expires_days).await?;

    Ok(Json(json!({
        "success": true,
        "activation_code": code,
        "user_email": request.user_email,
        "expires_at": expires_at.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct AdminKeyRequest {
    admin_key: String,
}

#[post("/usage-stats", data = "<request>")]
pub async fn api_usage_stats(
    request: Json<AdminKeyRequest>,
    config: &State<AppConfig>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    config.require_admin(&request.admin_key)?;

    let (statistics, users) = entitlement::usage_overview(db).await?;

    Ok(Json(json!({
        "success": true,
        "statistics": statistics,
        "users": users,
    })))
}

#[derive(Deserialize)]
pub struct RevokePremiumRequest {
    admin_key: String,
    user_email: String,
}

#[post("/revoke-premium", data = "<request>")]
pub async fn api_revoke_premium(
    request: Json<RevokePremiumRequest>,
    config: &State<AppConfig>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Value>, AppError> {
    config.require_admin(&request.admin_key)?;

    if request.user_email.trim().is_empty() {
        return Err(AppError::Validation(
            "A user email address is required".to_string(),
        ));
    }

    let mut user = find_user_by_email(db, &request.user_email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !user.is_premium {
        return Err(AppError::Validation(
            "This user is not a premium user".to_string(),
        ));
    }

    entitlement::revoke_premium(db, &mut user).await?;

    Ok(Json(json!({
        "success": true,
        "user_email": request.user_email,
        "message": "Premium status revoked",
    })))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
