//! Windsurf HTTP Server
//!
//! REST endpoints for the campus sustainability platform. Handlers stay
//! thin: they decode the request, resolve the caller from the bearer
//! token, and hand off to the workflow layer.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};

use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::{self, Caller};
use crate::error::{Error, Result};
use crate::leaderboard::{self, DepartmentStanding, LeaderboardEntry};
use crate::store::{
    ChallengeStatus, ChallengeUpdate, NewChallenge, NewReward, NewUser, Role, Store,
    SubmissionFilter, User, VerificationStatus,
};
use crate::workflow;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt_secret: String,
    pub feed_page_size: usize,
    pub started_at: std::time::Instant,
}

impl AppState {
    fn caller(&self, headers: &HeaderMap) -> Result<Caller> {
        auth::caller_from_headers(headers, &self.jwt_secret)
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/users/:id/stats", get(user_stats_handler))
        .route("/users/:id", delete(delete_user_handler))
        .route("/challenges", get(list_challenges_handler))
        .route("/challenges", post(create_challenge_handler))
        .route("/challenges/:id", get(get_challenge_handler))
        .route("/challenges/:id", put(update_challenge_handler))
        .route("/challenges/:id", delete(archive_challenge_handler))
        .route("/challenges/:id/join", post(join_challenge_handler))
        .route("/challenges/:id/submit", post(submit_proof_handler))
        .route("/submissions", get(list_submissions_handler))
        .route("/submissions/pending", get(pending_submissions_handler))
        .route("/submissions/my", get(my_submissions_handler))
        .route("/submissions/:id/verify", post(verify_submission_handler))
        .route("/leaderboard/global", get(global_leaderboard_handler))
        .route(
            "/leaderboard/department/:department",
            get(department_leaderboard_handler),
        )
        .route("/leaderboard/departments", get(department_rankings_handler))
        .route("/feed", get(feed_handler))
        .route("/posts", post(create_post_handler))
        .route("/posts/:id/like", post(like_post_handler))
        .route("/posts/:id/comments", post(comment_handler))
        .route("/rewards", get(list_rewards_handler))
        .route("/rewards", post(create_reward_handler))
        .route("/rewards/:id/claim", post(claim_reward_handler))
        .route("/analytics/overview", get(analytics_overview_handler))
        .route("/analytics/submissions", get(analytics_submissions_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// VIEW TYPES
// ============================================================================

/// User representation returned over the wire. Never exposes the hash.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<String>,
    pub eco_points: i64,
    pub badges: Vec<String>,
    pub challenges_completed: i64,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
            department: u.department,
            year: u.year,
            eco_points: u.eco_points,
            badges: u.badges,
            challenges_completed: u.challenges_completed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserView,
}

// ============================================================================
// HEALTH
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<String>,
}

fn default_role() -> Role {
    Role::Student
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    if req.name.trim().is_empty() || req.email.trim().is_empty() {
        return Err(Error::InvalidInput("name and email are required".into()));
    }
    if req.password.len() < 6 {
        return Err(Error::InvalidInput(
            "password must be at least 6 characters".into(),
        ));
    }

    let password_hash = auth::hash_password(&req.password)?;
    // Canonical form is lowercase; both stores match case-insensitively
    // but persist exactly what they are given.
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .create_user(NewUser {
            name: req.name,
            email,
            password_hash,
            role: req.role,
            department: req.department,
            year: req.year,
        })
        .await?;

    let token = auth::issue_token(&user, &state.jwt_secret)?;
    info!("Registered {} ({})", user.email, user.role.as_str());

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .store
        .user_by_email(&req.email)
        .await?
        .filter(|u| auth::verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| Error::Unauthorized("invalid email or password".into()))?;

    let token = auth::issue_token(&user, &state.jwt_secret)?;

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub user: UserView,
    pub rank: Option<u32>,
    pub challenges_joined: usize,
}

async fn user_stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<UserStats>> {
    state.caller(&headers)?;

    let user = state
        .store
        .user_by_id(id)
        .await?
        .ok_or(Error::NotFound("user"))?;

    let users = state.store.list_users().await?;
    let rank = leaderboard::user_rank(&users, id);
    let joined = state.store.joins_for_student(id).await?;

    Ok(Json(UserStats {
        user: user.into(),
        rank,
        challenges_joined: joined.len(),
    }))
}

async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let caller = state.caller(&headers)?;
    workflow::delete_user(state.store.as_ref(), caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// CHALLENGES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChallengeListQuery {
    pub status: Option<ChallengeStatus>,
}

async fn list_challenges_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChallengeListQuery>,
) -> Result<Json<serde_json::Value>> {
    let challenges = state.store.list_challenges(query.status).await?;
    Ok(Json(serde_json::json!({ "challenges": challenges })))
}

async fn get_challenge_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::store::Challenge>> {
    let challenge = state
        .store
        .challenge_by_id(id)
        .await?
        .ok_or(Error::NotFound("challenge"))?;
    Ok(Json(challenge))
}

#[derive(Debug, Deserialize)]
pub struct CreateChallengeRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
    pub points: i64,
}

async fn create_challenge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<(StatusCode, Json<crate::store::Challenge>)> {
    let caller = state.caller(&headers)?;

    let challenge = workflow::create_challenge(
        state.store.as_ref(),
        caller,
        NewChallenge {
            title: req.title,
            description: req.description,
            category: req.category,
            difficulty: req.difficulty,
            points: req.points,
            created_by: caller.user_id,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(challenge)))
}

async fn update_challenge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<ChallengeUpdate>,
) -> Result<Json<crate::store::Challenge>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let challenge = state.store.update_challenge(id, update).await?;
    Ok(Json(challenge))
}

async fn archive_challenge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::store::Challenge>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let challenge = state.store.archive_challenge(id).await?;
    info!("Archived challenge {}", id);
    Ok(Json(challenge))
}

async fn join_challenge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::store::JoinRecord>> {
    let caller = state.caller(&headers)?;
    let record = workflow::join_challenge(state.store.as_ref(), caller, id).await?;
    Ok(Json(record))
}

async fn submit_proof_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(proof): Json<workflow::Proof>,
) -> Result<(StatusCode, Json<crate::store::Submission>)> {
    let caller = state.caller(&headers)?;
    let submission = workflow::submit_proof(state.store.as_ref(), caller, id, proof).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

// ============================================================================
// SUBMISSIONS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmissionListQuery {
    pub status: Option<VerificationStatus>,
    pub student_id: Option<Uuid>,
    pub challenge_id: Option<Uuid>,
}

async fn list_submissions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SubmissionListQuery>,
) -> Result<Json<serde_json::Value>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let submissions = state
        .store
        .list_submissions(SubmissionFilter {
            status: query.status,
            student_id: query.student_id,
            challenge_id: query.challenge_id,
        })
        .await?;

    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

/// Shorthand for the reviewer queue.
async fn pending_submissions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let submissions = state
        .store
        .list_submissions(SubmissionFilter {
            status: Some(VerificationStatus::Pending),
            ..Default::default()
        })
        .await?;

    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

async fn my_submissions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let caller = state.caller(&headers)?;

    let submissions = state
        .store
        .list_submissions(SubmissionFilter {
            student_id: Some(caller.user_id),
            ..Default::default()
        })
        .await?;

    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub submission: crate::store::Submission,
    pub new_total: Option<i64>,
}

async fn verify_submission_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(decision): Json<workflow::Decision>,
) -> Result<Json<VerifyResponse>> {
    let caller = state.caller(&headers)?;
    let outcome = workflow::verify_submission(state.store.as_ref(), caller, id, decision).await?;

    Ok(Json(VerifyResponse {
        submission: outcome.submission,
        new_total: outcome.new_total,
    }))
}

// ============================================================================
// LEADERBOARD
// ============================================================================

const DEFAULT_LEADERBOARD_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
    pub department: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
}

async fn global_leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    let users = state.store.list_users().await?;

    let leaderboard = match query.department {
        Some(dept) => leaderboard::department_top(&users, &dept, limit),
        None => leaderboard::global_top(&users, limit),
    };

    Ok(Json(LeaderboardResponse { leaderboard }))
}

async fn department_leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Path(department): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    let users = state.store.list_users().await?;

    Ok(Json(LeaderboardResponse {
        leaderboard: leaderboard::department_top(&users, &department, limit),
    }))
}

async fn department_rankings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>> {
    let users = state.store.list_users().await?;
    let standings: Vec<DepartmentStanding> = leaderboard::department_rankings(&users);
    Ok(Json(serde_json::json!({ "departments": standings })))
}

// ============================================================================
// FEED
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

async fn feed_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(state.feed_page_size);
    let posts = state.store.list_feed(limit).await?;
    Ok(Json(serde_json::json!({ "posts": posts })))
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

async fn create_post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<crate::store::Post>)> {
    let caller = state.caller(&headers)?;
    if req.content.trim().is_empty() {
        return Err(Error::InvalidInput("content is required".into()));
    }

    let user = state
        .store
        .user_by_id(caller.user_id)
        .await?
        .ok_or(Error::NotFound("user"))?;

    let post = state
        .store
        .insert_post(crate::store::NewPost {
            author_id: user.id,
            author_name: user.name,
            content: req.content,
            challenge_id: None,
            points_earned: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

async fn like_post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::store::Post>> {
    let caller = state.caller(&headers)?;
    let post = state.store.like_post(id, caller.user_id).await?;
    Ok(Json(post))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

async fn comment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> Result<(StatusCode, Json<crate::store::Post>)> {
    let caller = state.caller(&headers)?;
    let post = workflow::comment_on_post(state.store.as_ref(), caller, id, req.content).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

// ============================================================================
// REWARDS
// ============================================================================

async fn list_rewards_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>> {
    let rewards = state.store.list_rewards(true).await?;
    Ok(Json(serde_json::json!({ "rewards": rewards })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRewardRequest {
    pub name: String,
    pub description: String,
    pub points_required: i64,
    pub stock: Option<i64>,
}

async fn create_reward_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRewardRequest>,
) -> Result<(StatusCode, Json<crate::store::Reward>)> {
    let caller = state.caller(&headers)?;
    if caller.role != Role::Admin {
        return Err(Error::Forbidden("admin access required".into()));
    }
    if req.points_required <= 0 {
        return Err(Error::InvalidInput("points_required must be positive".into()));
    }

    let reward = state
        .store
        .create_reward(NewReward {
            name: req.name,
            description: req.description,
            points_required: req.points_required,
            stock: req.stock,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(reward)))
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claim: crate::store::RewardClaim,
    pub remaining_points: i64,
}

async fn claim_reward_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ClaimResponse>)> {
    let caller = state.caller(&headers)?;
    let (claim, user) = workflow::claim_reward(state.store.as_ref(), caller, id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ClaimResponse {
            claim,
            remaining_points: user.eco_points,
        }),
    ))
}

// ============================================================================
// ANALYTICS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AnalyticsOverview {
    pub total_users: usize,
    pub total_students: usize,
    pub total_challenges: usize,
    pub active_challenges: usize,
    pub total_eco_points: i64,
    pub submissions: crate::store::SubmissionStats,
}

async fn analytics_overview_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AnalyticsOverview>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let users = state.store.list_users().await?;
    let challenges = state.store.list_challenges(None).await?;
    let submissions = state.store.submission_stats().await?;

    Ok(Json(AnalyticsOverview {
        total_users: users.len(),
        total_students: users.iter().filter(|u| u.role == Role::Student).count(),
        total_challenges: challenges.len(),
        active_challenges: challenges
            .iter()
            .filter(|c| c.status == ChallengeStatus::Active)
            .count(),
        total_eco_points: users.iter().map(|u| u.eco_points).sum(),
        submissions,
    }))
}

async fn analytics_submissions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<crate::store::SubmissionStats>> {
    let caller = state.caller(&headers)?;
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    Ok(Json(state.store.submission_stats().await?))
}

// ============================================================================
// SERVER
// ============================================================================

/// Run the server
pub async fn run_server(
    host: &str,
    port: u16,
    store: Arc<dyn Store>,
    jwt_secret: String,
    feed_page_size: usize,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        store,
        jwt_secret,
        feed_page_size,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Windsurf server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_storage::MemStorage;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(MemStorage::new()),
            jwt_secret: "test-secret".to_string(),
            feed_page_size: 50,
            started_at: std::time::Instant::now(),
        })
    }

    #[tokio::test]
    async fn register_rejects_short_password() {
        let state = test_state();
        let result = register_handler(
            State(state),
            Json(RegisterRequest {
                name: "Ada".to_string(),
                email: "ada@campus.edu".to_string(),
                password: "abc".to_string(),
                role: Role::Student,
                department: None,
                year: None,
            }),
        )
        .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let state = test_state();
        let (code, _) = register_handler(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Ada".to_string(),
                email: "ada@campus.edu".to_string(),
                password: "hunter22".to_string(),
                role: Role::Student,
                department: Some("Physics".to_string()),
                year: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(code, StatusCode::CREATED);

        let resp = login_handler(
            State(state),
            Json(LoginRequest {
                email: "ada@campus.edu".to_string(),
                password: "hunter22".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(resp.0.user.email, "ada@campus.edu");
        assert!(!resp.0.token.is_empty());
    }

    #[tokio::test]
    async fn email_is_canonicalized_to_lowercase() {
        let state = test_state();
        let (_, resp) = register_handler(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Ada".to_string(),
                email: "  Ada@Campus.EDU ".to_string(),
                password: "hunter22".to_string(),
                role: Role::Student,
                department: None,
                year: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.user.email, "ada@campus.edu");

        // Login matches regardless of the casing the client sends.
        let resp = login_handler(
            State(state),
            Json(LoginRequest {
                email: "ADA@campus.edu".to_string(),
                password: "hunter22".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0.user.email, "ada@campus.edu");
    }

    #[tokio::test]
    async fn login_wrong_password_is_unauthorized() {
        let state = test_state();
        register_handler(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Ada".to_string(),
                email: "ada@campus.edu".to_string(),
                password: "hunter22".to_string(),
                role: Role::Student,
                department: None,
                year: None,
            }),
        )
        .await
        .unwrap();

        let result = login_handler(
            State(state),
            Json(LoginRequest {
                email: "ada@campus.edu".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await;

        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }
}
