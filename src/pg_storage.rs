//! PostgreSQL Storage for the Windsurf platform
//!
//! Production store implementation. Connects with DATABASE_URL and applies
//! embedded migrations on startup. The workflow-critical primitives run as
//! conditional updates or short transactions with row locks, so racing
//! requests serialize at the database.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::info;
use uuid::Uuid;

use crate::badges;
use crate::error::{Error, Result};
use crate::store::{
    Challenge, ChallengeStatus, ChallengeUpdate, JoinRecord, NewChallenge, NewPost, NewReward,
    NewSubmission, NewUser, Post, PostComment, Reward, RewardClaim, Role, Store, Submission,
    SubmissionFilter, SubmissionStats, User, VerificationStatus,
};

/// Database pool configuration
const DB_POOL_MAX_SIZE: usize = 20;
const DB_QUERY_TIMEOUT_SECS: u64 = 30;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, department, year, \
     eco_points, badges, challenges_completed, created_at, updated_at";

const CHALLENGE_COLUMNS: &str = "id, title, description, category, difficulty, points, \
     status, participants, created_by, created_at, updated_at";

const SUBMISSION_COLUMNS: &str = "id, student_id, challenge_id, proof_description, proof_files, \
     verification_status, reviewer_comment, reviewed_by, reviewed_at, submitted_at";

const POST_COLUMNS: &str =
    "id, author_id, author_name, content, challenge_id, points_earned, liked_by, comments, created_at";

const REWARD_COLUMNS: &str = "id, name, description, points_required, stock, active, created_at";

// ============================================================================
// ROW MAPPING
// ============================================================================

fn user_from_row(row: &Row) -> Result<User> {
    let role: String = row.get(4);
    Ok(User {
        id: row.get(0),
        name: row.get(1),
        email: row.get(2),
        password_hash: row.get(3),
        role: Role::parse(&role)
            .ok_or_else(|| Error::Storage(anyhow::anyhow!("unknown role: {role}")))?,
        department: row.get(5),
        year: row.get(6),
        eco_points: row.get(7),
        badges: row.get(8),
        challenges_completed: row.get(9),
        created_at: row.get(10),
        updated_at: row.get(11),
    })
}

fn challenge_from_row(row: &Row) -> Result<Challenge> {
    let status: String = row.get(6);
    Ok(Challenge {
        id: row.get(0),
        title: row.get(1),
        description: row.get(2),
        category: row.get(3),
        difficulty: row.get(4),
        points: row.get(5),
        status: ChallengeStatus::parse(&status)
            .ok_or_else(|| Error::Storage(anyhow::anyhow!("unknown challenge status: {status}")))?,
        participants: row.get(7),
        created_by: row.get(8),
        created_at: row.get(9),
        updated_at: row.get(10),
    })
}

fn submission_from_row(row: &Row) -> Result<Submission> {
    let status: String = row.get(5);
    Ok(Submission {
        id: row.get(0),
        student_id: row.get(1),
        challenge_id: row.get(2),
        proof_description: row.get(3),
        proof_files: row.get(4),
        verification_status: VerificationStatus::parse(&status).ok_or_else(|| {
            Error::Storage(anyhow::anyhow!("unknown verification status: {status}"))
        })?,
        reviewer_comment: row.get(6),
        reviewed_by: row.get(7),
        reviewed_at: row.get(8),
        submitted_at: row.get(9),
    })
}

fn post_from_row(row: &Row) -> Result<Post> {
    let comments: serde_json::Value = row.get(7);
    let comments: Vec<PostComment> = serde_json::from_value(comments)
        .map_err(|e| Error::Storage(anyhow::anyhow!("malformed post comments: {e}")))?;
    Ok(Post {
        id: row.get(0),
        author_id: row.get(1),
        author_name: row.get(2),
        content: row.get(3),
        challenge_id: row.get(4),
        points_earned: row.get(5),
        liked_by: row.get(6),
        comments,
        created_at: row.get(8),
    })
}

fn reward_from_row(row: &Row) -> Reward {
    Reward {
        id: row.get(0),
        name: row.get(1),
        description: row.get(2),
        points_required: row.get(3),
        stock: row.get(4),
        active: row.get(5),
        created_at: row.get(6),
    }
}

// ============================================================================
// PG STORAGE
// ============================================================================

#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    /// Create storage from DATABASE_URL
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        use deadpool_postgres::{ManagerConfig, PoolConfig, RecyclingMethod};
        use std::time::Duration;

        let mut config = Config::new();
        config.url = Some(database_url.to_string());

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: DB_POOL_MAX_SIZE,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client
            .execute(
                &format!("SET statement_timeout = '{}s'", DB_QUERY_TIMEOUT_SECS),
                &[],
            )
            .await?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            DB_POOL_MAX_SIZE, DB_QUERY_TIMEOUT_SECS
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create storage from DATABASE_URL environment variable
    pub async fn from_env() -> anyhow::Result<Self> {
        let url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
        Self::new(&url).await
    }

    /// Run embedded migrations
    async fn run_migrations(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        // Check if migrations table exists
        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        if !exists {
            // Run initial schema migration
            let migration_sql = include_str!("../migrations/001_schema.sql");
            client.batch_execute(migration_sql).await?;
            info!("Applied migration 001_schema");
        }

        Ok(())
    }

    fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
        e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
    }
}

#[async_trait]
impl Store for PgStorage {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    async fn create_user(&self, new: NewUser) -> Result<User> {
        let client = self.pool.get().await?;

        let id = Uuid::new_v4();
        let badges = vec![badges::starting_badge()];

        let result = client
            .query_one(
                &format!(
                    "INSERT INTO users (id, name, email, password_hash, role, department, year, badges)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING {USER_COLUMNS}"
                ),
                &[
                    &id,
                    &new.name,
                    &new.email,
                    &new.password_hash,
                    &new.role.as_str(),
                    &new.department,
                    &new.year,
                    &badges,
                ],
            )
            .await;

        match result {
            Ok(row) => user_from_row(&row),
            Err(e) if Self::is_unique_violation(&e) => {
                Err(Error::Conflict("email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"),
                &[&email],
            )
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY seq"),
                &[],
            )
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn award_points(&self, user_id: Uuid, delta: i64, completed_inc: i64) -> Result<User> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT eco_points, badges FROM users WHERE id = $1 FOR UPDATE",
                &[&user_id],
            )
            .await?
            .ok_or(Error::NotFound("user"))?;

        let current: i64 = row.get(0);
        let existing: Vec<String> = row.get(1);
        let (new_total, new_badges) = badges::apply_award(current, delta, &existing)?;

        let updated = tx
            .query_one(
                &format!(
                    "UPDATE users
                     SET eco_points = $2, badges = $3,
                         challenges_completed = challenges_completed + $4,
                         updated_at = NOW()
                     WHERE id = $1
                     RETURNING {USER_COLUMNS}"
                ),
                &[&user_id, &new_total, &new_badges, &completed_inc],
            )
            .await?;

        tx.commit().await?;
        user_from_row(&updated)
    }

    async fn delete_user_cascade(&self, user_id: Uuid) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Keep participant counters consistent with the join-record set
        // before the FK cascade removes the join rows.
        tx.execute(
            "UPDATE challenges
             SET participants = GREATEST(participants - 1, 0)
             WHERE id IN (SELECT challenge_id FROM joined_challenges WHERE student_id = $1)",
            &[&user_id],
        )
        .await?;

        let deleted = tx
            .execute("DELETE FROM users WHERE id = $1", &[&user_id])
            .await?;
        if deleted == 0 {
            return Err(Error::NotFound("user"));
        }

        tx.commit().await?;
        info!("Deleted user {} with cascading records", user_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    async fn create_challenge(&self, new: NewChallenge) -> Result<Challenge> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO challenges (id, title, description, category, difficulty, points, created_by)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {CHALLENGE_COLUMNS}"
                ),
                &[
                    &id,
                    &new.title,
                    &new.description,
                    &new.category,
                    &new.difficulty,
                    &new.points,
                    &new.created_by,
                ],
            )
            .await?;

        challenge_from_row(&row)
    }

    async fn challenge_by_id(&self, id: Uuid) -> Result<Option<Challenge>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| challenge_from_row(&r)).transpose()
    }

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        let client = self.pool.get().await?;

        let rows = match status {
            Some(s) => {
                client
                    .query(
                        &format!(
                            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = $1 ORDER BY created_at DESC"
                        ),
                        &[&s.as_str()],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        &format!(
                            "SELECT {CHALLENGE_COLUMNS} FROM challenges ORDER BY created_at DESC"
                        ),
                        &[],
                    )
                    .await?
            }
        };

        rows.iter().map(challenge_from_row).collect()
    }

    async fn update_challenge(&self, id: Uuid, update: ChallengeUpdate) -> Result<Challenge> {
        if let Some(points) = update.points {
            if points <= 0 {
                return Err(Error::InvalidInput("points must be positive".into()));
            }
        }

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE challenges
                     SET title = COALESCE($2, title),
                         description = COALESCE($3, description),
                         category = COALESCE($4, category),
                         difficulty = COALESCE($5, difficulty),
                         points = COALESCE($6, points),
                         updated_at = NOW()
                     WHERE id = $1
                     RETURNING {CHALLENGE_COLUMNS}"
                ),
                &[
                    &id,
                    &update.title,
                    &update.description,
                    &update.category,
                    &update.difficulty,
                    &update.points,
                ],
            )
            .await?
            .ok_or(Error::NotFound("challenge"))?;

        challenge_from_row(&row)
    }

    async fn archive_challenge(&self, id: Uuid) -> Result<Challenge> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE challenges SET status = 'archived', updated_at = NOW()
                     WHERE id = $1
                     RETURNING {CHALLENGE_COLUMNS}"
                ),
                &[&id],
            )
            .await?
            .ok_or(Error::NotFound("challenge"))?;

        challenge_from_row(&row)
    }

    async fn insert_join(&self, student_id: Uuid, challenge_id: Uuid) -> Result<JoinRecord> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let exists: bool = tx
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM challenges WHERE id = $1)",
                &[&challenge_id],
            )
            .await?
            .get(0);
        if !exists {
            return Err(Error::NotFound("challenge"));
        }

        // Unique-constraint idempotency: a duplicate join inserts nothing
        // and must not touch the counter.
        let inserted = tx
            .execute(
                "INSERT INTO joined_challenges (student_id, challenge_id)
                 VALUES ($1, $2)
                 ON CONFLICT (student_id, challenge_id) DO NOTHING",
                &[&student_id, &challenge_id],
            )
            .await?;
        if inserted == 0 {
            return Err(Error::Conflict("already joined this challenge".into()));
        }

        tx.execute(
            "UPDATE challenges SET participants = participants + 1 WHERE id = $1",
            &[&challenge_id],
        )
        .await?;

        let row = tx
            .query_one(
                "SELECT student_id, challenge_id, joined_at FROM joined_challenges
                 WHERE student_id = $1 AND challenge_id = $2",
                &[&student_id, &challenge_id],
            )
            .await?;

        tx.commit().await?;

        Ok(JoinRecord {
            student_id: row.get(0),
            challenge_id: row.get(1),
            joined_at: row.get(2),
        })
    }

    async fn has_joined(&self, student_id: Uuid, challenge_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM joined_challenges WHERE student_id = $1 AND challenge_id = $2)",
                &[&student_id, &challenge_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn joins_for_student(&self, student_id: Uuid) -> Result<Vec<JoinRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT student_id, challenge_id, joined_at FROM joined_challenges
                 WHERE student_id = $1 ORDER BY joined_at DESC",
                &[&student_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| JoinRecord {
                student_id: r.get(0),
                challenge_id: r.get(1),
                joined_at: r.get(2),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO submissions (id, student_id, challenge_id, proof_description, proof_files)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {SUBMISSION_COLUMNS}"
                ),
                &[
                    &id,
                    &new.student_id,
                    &new.challenge_id,
                    &new.proof_description,
                    &new.proof_files,
                ],
            )
            .await?;

        submission_from_row(&row)
    }

    async fn submission_by_id(&self, id: Uuid) -> Result<Option<Submission>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| submission_from_row(&r)).transpose()
    }

    async fn list_submissions(&self, filter: SubmissionFilter) -> Result<Vec<Submission>> {
        let client = self.pool.get().await?;

        let status = filter.status.map(|s| s.as_str().to_string());
        let rows = client
            .query(
                &format!(
                    "SELECT {SUBMISSION_COLUMNS} FROM submissions
                     WHERE ($1::TEXT IS NULL OR verification_status = $1)
                       AND ($2::UUID IS NULL OR student_id = $2)
                       AND ($3::UUID IS NULL OR challenge_id = $3)
                     ORDER BY submitted_at DESC"
                ),
                &[&status, &filter.student_id, &filter.challenge_id],
            )
            .await?;

        rows.iter().map(submission_from_row).collect()
    }

    async fn transition_submission(
        &self,
        id: Uuid,
        status: VerificationStatus,
        reviewer: Uuid,
        comment: Option<String>,
    ) -> Result<Submission> {
        let client = self.pool.get().await?;

        // Conditional update: only a pending submission transitions. A
        // racing duplicate decision matches zero rows.
        let row = client
            .query_opt(
                &format!(
                    "UPDATE submissions
                     SET verification_status = $2, reviewer_comment = $3,
                         reviewed_by = $4, reviewed_at = NOW()
                     WHERE id = $1 AND verification_status = 'pending'
                     RETURNING {SUBMISSION_COLUMNS}"
                ),
                &[&id, &status.as_str(), &comment, &reviewer],
            )
            .await?;

        match row {
            Some(r) => submission_from_row(&r),
            None => {
                let exists: bool = client
                    .query_one(
                        "SELECT EXISTS(SELECT 1 FROM submissions WHERE id = $1)",
                        &[&id],
                    )
                    .await?
                    .get(0);
                if exists {
                    Err(Error::Conflict("submission already decided".into()))
                } else {
                    Err(Error::NotFound("submission"))
                }
            }
        }
    }

    async fn submission_stats(&self) -> Result<SubmissionStats> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE verification_status = 'pending'),
                    COUNT(*) FILTER (WHERE verification_status = 'approved'),
                    COUNT(*) FILTER (WHERE verification_status = 'rejected')
                 FROM submissions",
                &[],
            )
            .await?;

        Ok(SubmissionStats {
            total: row.get(0),
            pending: row.get(1),
            approved: row.get(2),
            rejected: row.get(3),
        })
    }

    // ------------------------------------------------------------------
    // Posts / feed
    // ------------------------------------------------------------------

    async fn insert_post(&self, new: NewPost) -> Result<Post> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO posts (id, author_id, author_name, content, challenge_id, points_earned)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {POST_COLUMNS}"
                ),
                &[
                    &id,
                    &new.author_id,
                    &new.author_name,
                    &new.content,
                    &new.challenge_id,
                    &new.points_earned,
                ],
            )
            .await?;

        post_from_row(&row)
    }

    async fn list_feed(&self, limit: usize) -> Result<Vec<Post>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC LIMIT $1"
                ),
                &[&(limit as i64)],
            )
            .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn like_post(&self, post_id: Uuid, user_id: Uuid) -> Result<Post> {
        let client = self.pool.get().await?;

        // array_append under a guard gives set semantics.
        let row = client
            .query_opt(
                &format!(
                    "UPDATE posts
                     SET liked_by = CASE
                         WHEN $2 = ANY(liked_by) THEN liked_by
                         ELSE array_append(liked_by, $2)
                     END
                     WHERE id = $1
                     RETURNING {POST_COLUMNS}"
                ),
                &[&post_id, &user_id],
            )
            .await?
            .ok_or(Error::NotFound("post"))?;

        post_from_row(&row)
    }

    async fn add_comment(&self, post_id: Uuid, comment: PostComment) -> Result<Post> {
        let client = self.pool.get().await?;

        let comment_json = serde_json::to_value(&comment)
            .map_err(|e| Error::Storage(anyhow::anyhow!("failed to serialize comment: {e}")))?;

        let row = client
            .query_opt(
                &format!(
                    "UPDATE posts SET comments = comments || $2::JSONB
                     WHERE id = $1
                     RETURNING {POST_COLUMNS}"
                ),
                &[&post_id, &comment_json],
            )
            .await?
            .ok_or(Error::NotFound("post"))?;

        post_from_row(&row)
    }

    // ------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------

    async fn create_reward(&self, new: NewReward) -> Result<Reward> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO rewards (id, name, description, points_required, stock)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {REWARD_COLUMNS}"
                ),
                &[
                    &id,
                    &new.name,
                    &new.description,
                    &new.points_required,
                    &new.stock,
                ],
            )
            .await?;

        Ok(reward_from_row(&row))
    }

    async fn reward_by_id(&self, id: Uuid) -> Result<Option<Reward>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(row.map(|r| reward_from_row(&r)))
    }

    async fn list_rewards(&self, active_only: bool) -> Result<Vec<Reward>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {REWARD_COLUMNS} FROM rewards
                     WHERE $1 = FALSE OR active
                     ORDER BY points_required"
                ),
                &[&active_only],
            )
            .await?;
        Ok(rows.iter().map(reward_from_row).collect())
    }

    async fn record_claim(
        &self,
        reward_id: Uuid,
        user_id: Uuid,
        cost: i64,
    ) -> Result<(RewardClaim, User)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT stock, active FROM rewards WHERE id = $1 FOR UPDATE",
                &[&reward_id],
            )
            .await?
            .ok_or(Error::NotFound("reward"))?;

        let stock: Option<i64> = row.get(0);
        let active: bool = row.get(1);
        if !active {
            return Err(Error::Conflict("reward is no longer available".into()));
        }

        // Balance check and deduction run under the same row lock, so
        // racing claims against one balance serialize here.
        let row = tx
            .query_opt(
                "SELECT eco_points, badges FROM users WHERE id = $1 FOR UPDATE",
                &[&user_id],
            )
            .await?
            .ok_or(Error::NotFound("user"))?;
        let current: i64 = row.get(0);
        let existing: Vec<String> = row.get(1);
        if current < cost {
            return Err(Error::Conflict("insufficient points".into()));
        }

        match stock {
            Some(0) => return Err(Error::Conflict("reward out of stock".into())),
            Some(_) => {
                tx.execute(
                    "UPDATE rewards SET stock = stock - 1 WHERE id = $1",
                    &[&reward_id],
                )
                .await?;
            }
            None => {}
        }

        let (new_total, new_badges) = badges::apply_award(current, -cost, &existing)?;
        let updated = tx
            .query_one(
                &format!(
                    "UPDATE users SET eco_points = $2, badges = $3, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {USER_COLUMNS}"
                ),
                &[&user_id, &new_total, &new_badges],
            )
            .await?;

        let id = Uuid::new_v4();
        let claimed_at = Utc::now();
        tx.execute(
            "INSERT INTO reward_claims (id, reward_id, user_id, claimed_at) VALUES ($1, $2, $3, $4)",
            &[&id, &reward_id, &user_id, &claimed_at],
        )
        .await?;

        tx.commit().await?;

        Ok((
            RewardClaim {
                id,
                reward_id,
                user_id,
                claimed_at,
            },
            user_from_row(&updated)?,
        ))
    }
}
