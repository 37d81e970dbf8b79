//! Store abstraction for the Windsurf platform
//!
//! Core workflows are store-agnostic: they receive a `Store` and rely on a
//! small set of atomic primitives (submission state transition, point award,
//! unique join insert, stock decrement) so that racing requests cannot
//! double-award points or desync counters. Two implementations exist:
//! `MemStorage` (in-memory, optional flat-JSON persistence) and `PgStorage`
//! (PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
    Faculty,
}

impl Role {
    /// Admins and faculty may verify submissions.
    pub fn can_review(&self) -> bool {
        matches!(self, Role::Admin | Role::Faculty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
            Role::Faculty => "faculty",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            "faculty" => Some(Role::Faculty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Active,
    Archived,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Active => "active",
            ChallengeStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<ChallengeStatus> {
        match s {
            "active" => Some(ChallengeStatus::Active),
            "archived" => Some(ChallengeStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<VerificationStatus> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "approved" => Some(VerificationStatus::Approved),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<String>,
    pub eco_points: i64,
    pub badges: Vec<String>,
    pub challenges_completed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
    pub points: i64,
    pub status: ChallengeStatus,
    pub participants: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
    pub points: i64,
    pub created_by: Uuid,
}

/// Fields an admin may change on an existing challenge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: Uuid,
    pub challenge_id: Uuid,
    pub proof_description: String,
    pub proof_files: Vec<String>,
    pub verification_status: VerificationStatus,
    pub reviewer_comment: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub student_id: Uuid,
    pub challenge_id: Uuid,
    pub proof_description: String,
    pub proof_files: Vec<String>,
}

/// Filters for the admin submission list.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub status: Option<VerificationStatus>,
    pub student_id: Option<Uuid>,
    pub challenge_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostComment {
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub challenge_id: Option<Uuid>,
    pub points_earned: Option<i64>,
    pub liked_by: Vec<Uuid>,
    pub comments: Vec<PostComment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub challenge_id: Option<Uuid>,
    pub points_earned: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRecord {
    pub student_id: Uuid,
    pub challenge_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub points_required: i64,
    /// None means unlimited stock.
    pub stock: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReward {
    pub name: String,
    pub description: String,
    pub points_required: i64,
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardClaim {
    pub id: Uuid,
    pub reward_id: Uuid,
    pub user_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

/// Submission counts by decision state.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Repository interface the core workflows run against.
///
/// Methods that back a multi-step workflow are specified as atomic units:
/// an implementation must serialize racing calls so that preconditions and
/// mutations cannot interleave (single lock section in memory, transaction
/// or conditional update in SQL).
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a new user. `Conflict` if the email is taken.
    async fn create_user(&self, new: NewUser) -> Result<User>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// All users in insertion order (the leaderboard tie-break order).
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Atomically apply a point delta, recompute the badge set, and bump
    /// `challenges_completed` by `completed_inc`. `NotFound` if the user
    /// is missing. The returned user reflects the update.
    async fn award_points(&self, user_id: Uuid, delta: i64, completed_inc: i64) -> Result<User>;

    /// Delete a user together with their posts, submissions and join
    /// records. `NotFound` if the user is missing.
    async fn delete_user_cascade(&self, user_id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    async fn create_challenge(&self, new: NewChallenge) -> Result<Challenge>;

    async fn challenge_by_id(&self, id: Uuid) -> Result<Option<Challenge>>;

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>>;

    async fn update_challenge(&self, id: Uuid, update: ChallengeUpdate) -> Result<Challenge>;

    /// Soft-delete: mark the challenge archived.
    async fn archive_challenge(&self, id: Uuid) -> Result<Challenge>;

    /// Atomically create the unique (student, challenge) join record and
    /// increment the participant counter. `Conflict` if already joined.
    async fn insert_join(&self, student_id: Uuid, challenge_id: Uuid) -> Result<JoinRecord>;

    async fn has_joined(&self, student_id: Uuid, challenge_id: Uuid) -> Result<bool>;

    async fn joins_for_student(&self, student_id: Uuid) -> Result<Vec<JoinRecord>>;

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission>;

    async fn submission_by_id(&self, id: Uuid) -> Result<Option<Submission>>;

    async fn list_submissions(&self, filter: SubmissionFilter) -> Result<Vec<Submission>>;

    /// Compare-and-swap out of `pending`: record the decision, reviewer and
    /// timestamp only if the submission is still pending. `NotFound` if the
    /// submission is missing, `Conflict` if it was already decided.
    async fn transition_submission(
        &self,
        id: Uuid,
        status: VerificationStatus,
        reviewer: Uuid,
        comment: Option<String>,
    ) -> Result<Submission>;

    async fn submission_stats(&self) -> Result<SubmissionStats>;

    // ------------------------------------------------------------------
    // Posts / feed
    // ------------------------------------------------------------------

    async fn insert_post(&self, new: NewPost) -> Result<Post>;

    /// Newest-first feed.
    async fn list_feed(&self, limit: usize) -> Result<Vec<Post>>;

    /// Set semantics: liking twice is a no-op. Returns the updated post.
    async fn like_post(&self, post_id: Uuid, user_id: Uuid) -> Result<Post>;

    async fn add_comment(&self, post_id: Uuid, comment: PostComment) -> Result<Post>;

    // ------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------

    async fn create_reward(&self, new: NewReward) -> Result<Reward>;

    async fn reward_by_id(&self, id: Uuid) -> Result<Option<Reward>>;

    async fn list_rewards(&self, active_only: bool) -> Result<Vec<Reward>>;

    /// Atomically verify the user holds at least `cost` points, deduct
    /// them (badges are kept), decrement stock (when finite), and record
    /// the claim. `Conflict` if the balance is insufficient, the reward is
    /// out of stock, or inactive. The returned user reflects the deduction.
    async fn record_claim(
        &self,
        reward_id: Uuid,
        user_id: Uuid,
        cost: i64,
    ) -> Result<(RewardClaim, User)>;
}
