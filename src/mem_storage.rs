//! In-memory storage with optional flat-JSON persistence
//!
//! Backs development mode and tests. All collections live behind a single
//! mutex, so every `Store` primitive is naturally atomic. Records are kept
//! in insertion order, which is the documented leaderboard tie-break order.
//! When opened with a path, the full state is snapshotted to a JSON file
//! after each mutation.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::badges;
use crate::error::{Error, Result};
use crate::store::{
    Challenge, ChallengeStatus, ChallengeUpdate, JoinRecord, NewChallenge, NewPost, NewReward,
    NewSubmission, NewUser, Post, PostComment, Reward, RewardClaim, Store, Submission,
    SubmissionFilter, SubmissionStats, User, VerificationStatus,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    users: Vec<User>,
    challenges: Vec<Challenge>,
    submissions: Vec<Submission>,
    posts: Vec<Post>,
    joins: Vec<JoinRecord>,
    rewards: Vec<Reward>,
    claims: Vec<RewardClaim>,
}

pub struct MemStorage {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemStorage {
    /// Pure in-memory store (used by tests and as the workflow fake).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            path: None,
        }
    }

    /// Open a store backed by a flat JSON file, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            State::default()
        };

        info!("Opened JSON store at {}", path.display());

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn persist(&self, state: &State) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(state)
                .context("failed to serialize store state")?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStorage {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    async fn create_user(&self, new: NewUser) -> Result<User> {
        let mut state = self.state.lock();

        if state
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(Error::Conflict("email already registered".into()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            department: new.department,
            year: new.year,
            eco_points: 0,
            badges: vec![badges::starting_badge()],
            challenges_completed: 0,
            created_at: now,
            updated_at: now,
        };

        state.users.push(user.clone());
        self.persist(&state)?;
        Ok(user)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let state = self.state.lock();
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock();
        Ok(state
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let state = self.state.lock();
        Ok(state.users.clone())
    }

    async fn award_points(&self, user_id: Uuid, delta: i64, completed_inc: i64) -> Result<User> {
        let mut state = self.state.lock();

        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(Error::NotFound("user"))?;

        let (new_total, new_badges) = badges::apply_award(user.eco_points, delta, &user.badges)?;
        user.eco_points = new_total;
        user.badges = new_badges;
        user.challenges_completed += completed_inc;
        user.updated_at = Utc::now();
        let updated = user.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    async fn delete_user_cascade(&self, user_id: Uuid) -> Result<()> {
        let mut state = self.state.lock();

        let before = state.users.len();
        state.users.retain(|u| u.id != user_id);
        if state.users.len() == before {
            return Err(Error::NotFound("user"));
        }

        state.posts.retain(|p| p.author_id != user_id);
        state.submissions.retain(|s| s.student_id != user_id);

        // Keep participant counters consistent with the join-record set.
        let removed: Vec<Uuid> = state
            .joins
            .iter()
            .filter(|j| j.student_id == user_id)
            .map(|j| j.challenge_id)
            .collect();
        state.joins.retain(|j| j.student_id != user_id);
        for challenge_id in removed {
            if let Some(c) = state.challenges.iter_mut().find(|c| c.id == challenge_id) {
                c.participants = (c.participants - 1).max(0);
            }
        }

        self.persist(&state)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Challenges
    // ------------------------------------------------------------------

    async fn create_challenge(&self, new: NewChallenge) -> Result<Challenge> {
        let mut state = self.state.lock();

        let now = Utc::now();
        let challenge = Challenge {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            category: new.category,
            difficulty: new.difficulty,
            points: new.points,
            status: ChallengeStatus::Active,
            participants: 0,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };

        state.challenges.push(challenge.clone());
        self.persist(&state)?;
        Ok(challenge)
    }

    async fn challenge_by_id(&self, id: Uuid) -> Result<Option<Challenge>> {
        let state = self.state.lock();
        Ok(state.challenges.iter().find(|c| c.id == id).cloned())
    }

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        let state = self.state.lock();
        Ok(state
            .challenges
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn update_challenge(&self, id: Uuid, update: ChallengeUpdate) -> Result<Challenge> {
        // Validate before touching the record; a rejected update must leave
        // every field as it was.
        if let Some(points) = update.points {
            if points <= 0 {
                return Err(Error::InvalidInput("points must be positive".into()));
            }
        }

        let mut state = self.state.lock();

        let challenge = state
            .challenges
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::NotFound("challenge"))?;

        if let Some(title) = update.title {
            challenge.title = title;
        }
        if let Some(description) = update.description {
            challenge.description = description;
        }
        if let Some(category) = update.category {
            challenge.category = category;
        }
        if let Some(difficulty) = update.difficulty {
            challenge.difficulty = difficulty;
        }
        if let Some(points) = update.points {
            challenge.points = points;
        }
        challenge.updated_at = Utc::now();
        let updated = challenge.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    async fn archive_challenge(&self, id: Uuid) -> Result<Challenge> {
        let mut state = self.state.lock();

        let challenge = state
            .challenges
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::NotFound("challenge"))?;

        challenge.status = ChallengeStatus::Archived;
        challenge.updated_at = Utc::now();
        let updated = challenge.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    async fn insert_join(&self, student_id: Uuid, challenge_id: Uuid) -> Result<JoinRecord> {
        let mut state = self.state.lock();

        if !state.challenges.iter().any(|c| c.id == challenge_id) {
            return Err(Error::NotFound("challenge"));
        }
        if state
            .joins
            .iter()
            .any(|j| j.student_id == student_id && j.challenge_id == challenge_id)
        {
            return Err(Error::Conflict("already joined this challenge".into()));
        }

        let record = JoinRecord {
            student_id,
            challenge_id,
            joined_at: Utc::now(),
        };
        state.joins.push(record.clone());

        // Same lock section as the insert: counter and join set move together.
        if let Some(c) = state.challenges.iter_mut().find(|c| c.id == challenge_id) {
            c.participants += 1;
        }

        self.persist(&state)?;
        Ok(record)
    }

    async fn has_joined(&self, student_id: Uuid, challenge_id: Uuid) -> Result<bool> {
        let state = self.state.lock();
        Ok(state
            .joins
            .iter()
            .any(|j| j.student_id == student_id && j.challenge_id == challenge_id))
    }

    async fn joins_for_student(&self, student_id: Uuid) -> Result<Vec<JoinRecord>> {
        let state = self.state.lock();
        Ok(state
            .joins
            .iter()
            .filter(|j| j.student_id == student_id)
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission> {
        let mut state = self.state.lock();

        let submission = Submission {
            id: Uuid::new_v4(),
            student_id: new.student_id,
            challenge_id: new.challenge_id,
            proof_description: new.proof_description,
            proof_files: new.proof_files,
            verification_status: VerificationStatus::Pending,
            reviewer_comment: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: Utc::now(),
        };

        state.submissions.push(submission.clone());
        self.persist(&state)?;
        Ok(submission)
    }

    async fn submission_by_id(&self, id: Uuid) -> Result<Option<Submission>> {
        let state = self.state.lock();
        Ok(state.submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_submissions(&self, filter: SubmissionFilter) -> Result<Vec<Submission>> {
        let state = self.state.lock();
        let mut result: Vec<Submission> = state
            .submissions
            .iter()
            .filter(|s| {
                filter
                    .status
                    .map_or(true, |st| s.verification_status == st)
                    && filter.student_id.map_or(true, |id| s.student_id == id)
                    && filter.challenge_id.map_or(true, |id| s.challenge_id == id)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(result)
    }

    async fn transition_submission(
        &self,
        id: Uuid,
        status: VerificationStatus,
        reviewer: Uuid,
        comment: Option<String>,
    ) -> Result<Submission> {
        let mut state = self.state.lock();

        let submission = state
            .submissions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(Error::NotFound("submission"))?;

        if submission.verification_status != VerificationStatus::Pending {
            return Err(Error::Conflict("submission already decided".into()));
        }

        submission.verification_status = status;
        submission.reviewer_comment = comment;
        submission.reviewed_by = Some(reviewer);
        submission.reviewed_at = Some(Utc::now());
        let updated = submission.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    async fn submission_stats(&self) -> Result<SubmissionStats> {
        let state = self.state.lock();
        let count = |status| {
            state
                .submissions
                .iter()
                .filter(|s| s.verification_status == status)
                .count() as i64
        };
        Ok(SubmissionStats {
            total: state.submissions.len() as i64,
            pending: count(VerificationStatus::Pending),
            approved: count(VerificationStatus::Approved),
            rejected: count(VerificationStatus::Rejected),
        })
    }

    // ------------------------------------------------------------------
    // Posts / feed
    // ------------------------------------------------------------------

    async fn insert_post(&self, new: NewPost) -> Result<Post> {
        let mut state = self.state.lock();

        let post = Post {
            id: Uuid::new_v4(),
            author_id: new.author_id,
            author_name: new.author_name,
            content: new.content,
            challenge_id: new.challenge_id,
            points_earned: new.points_earned,
            liked_by: Vec::new(),
            comments: Vec::new(),
            created_at: Utc::now(),
        };

        state.posts.push(post.clone());
        self.persist(&state)?;
        Ok(post)
    }

    async fn list_feed(&self, limit: usize) -> Result<Vec<Post>> {
        let state = self.state.lock();
        Ok(state.posts.iter().rev().take(limit).cloned().collect())
    }

    async fn like_post(&self, post_id: Uuid, user_id: Uuid) -> Result<Post> {
        let mut state = self.state.lock();

        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or(Error::NotFound("post"))?;

        if !post.liked_by.contains(&user_id) {
            post.liked_by.push(user_id);
        }
        let updated = post.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    async fn add_comment(&self, post_id: Uuid, comment: PostComment) -> Result<Post> {
        let mut state = self.state.lock();

        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or(Error::NotFound("post"))?;

        post.comments.push(comment);
        let updated = post.clone();

        self.persist(&state)?;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------

    async fn create_reward(&self, new: NewReward) -> Result<Reward> {
        let mut state = self.state.lock();

        let reward = Reward {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            points_required: new.points_required,
            stock: new.stock,
            active: true,
            created_at: Utc::now(),
        };

        state.rewards.push(reward.clone());
        self.persist(&state)?;
        Ok(reward)
    }

    async fn reward_by_id(&self, id: Uuid) -> Result<Option<Reward>> {
        let state = self.state.lock();
        Ok(state.rewards.iter().find(|r| r.id == id).cloned())
    }

    async fn list_rewards(&self, active_only: bool) -> Result<Vec<Reward>> {
        let state = self.state.lock();
        Ok(state
            .rewards
            .iter()
            .filter(|r| !active_only || r.active)
            .cloned()
            .collect())
    }

    async fn record_claim(
        &self,
        reward_id: Uuid,
        user_id: Uuid,
        cost: i64,
    ) -> Result<(RewardClaim, User)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let reward = state
            .rewards
            .iter_mut()
            .find(|r| r.id == reward_id)
            .ok_or(Error::NotFound("reward"))?;

        if !reward.active {
            return Err(Error::Conflict("reward is no longer available".into()));
        }

        // Balance check and deduction share this lock section, so two
        // racing claims against one balance serialize here.
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(Error::NotFound("user"))?;
        if user.eco_points < cost {
            return Err(Error::Conflict("insufficient points".into()));
        }

        match reward.stock {
            Some(0) => return Err(Error::Conflict("reward out of stock".into())),
            Some(n) => reward.stock = Some(n - 1),
            None => {}
        }

        let (new_total, new_badges) = badges::apply_award(user.eco_points, -cost, &user.badges)?;
        user.eco_points = new_total;
        user.badges = new_badges;
        user.updated_at = Utc::now();
        let updated_user = user.clone();

        let claim = RewardClaim {
            id: Uuid::new_v4(),
            reward_id,
            user_id,
            claimed_at: Utc::now(),
        };
        state.claims.push(claim.clone());

        self.persist(state)?;
        Ok((claim, updated_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "x".to_string(),
            role: Role::Student,
            department: Some("Environmental Science".to_string()),
            year: None,
        }
    }

    fn new_challenge(created_by: Uuid, points: i64) -> NewChallenge {
        NewChallenge {
            title: "Plastic-Free Week".to_string(),
            description: "Skip single-use plastics".to_string(),
            category: "Waste Management".to_string(),
            difficulty: "Medium".to_string(),
            points,
            created_by,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let store = MemStorage::new();
        store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();

        let err = store
            .create_user(new_user("B", "A@sece.ac.in"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn new_user_starts_with_zero_threshold_badge() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();

        assert_eq!(user.eco_points, 0);
        assert_eq!(user.badges, vec!["Green Beginner".to_string()]);
    }

    #[tokio::test]
    async fn join_is_unique_and_counter_moves_once() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        let challenge = store
            .create_challenge(new_challenge(user.id, 50))
            .await
            .unwrap();

        store.insert_join(user.id, challenge.id).await.unwrap();
        let err = store.insert_join(user.id, challenge.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let challenge = store.challenge_by_id(challenge.id).await.unwrap().unwrap();
        assert_eq!(challenge.participants, 1);
    }

    #[tokio::test]
    async fn submission_leaves_pending_exactly_once() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        let challenge = store
            .create_challenge(new_challenge(user.id, 50))
            .await
            .unwrap();
        let submission = store
            .create_submission(NewSubmission {
                student_id: user.id,
                challenge_id: challenge.id,
                proof_description: "done".to_string(),
                proof_files: vec![],
            })
            .await
            .unwrap();

        let decided = store
            .transition_submission(
                submission.id,
                VerificationStatus::Approved,
                user.id,
                Some("ok".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(decided.verification_status, VerificationStatus::Approved);
        assert!(decided.reviewed_at.is_some());

        let err = store
            .transition_submission(submission.id, VerificationStatus::Rejected, user.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn award_updates_points_and_badges() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();

        let updated = store.award_points(user.id, 120, 1).await.unwrap();
        assert_eq!(updated.eco_points, 120);
        assert_eq!(updated.challenges_completed, 1);
        assert!(updated.badges.iter().any(|b| b == "Eco Learner"));
    }

    #[tokio::test]
    async fn like_is_set_semantics() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        let post = store
            .insert_post(NewPost {
                author_id: user.id,
                author_name: user.name.clone(),
                content: "hello".to_string(),
                challenge_id: None,
                points_earned: None,
            })
            .await
            .unwrap();

        store.like_post(post.id, user.id).await.unwrap();
        let post = store.like_post(post.id, user.id).await.unwrap();
        assert_eq!(post.liked_by.len(), 1);
    }

    #[tokio::test]
    async fn claim_decrements_stock_and_stops_at_zero() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        store.award_points(user.id, 300, 0).await.unwrap();
        let reward = store
            .create_reward(NewReward {
                name: "Eco Warrior Badge".to_string(),
                description: "Limited".to_string(),
                points_required: 100,
                stock: Some(1),
            })
            .await
            .unwrap();

        let (_, user_after) = store.record_claim(reward.id, user.id, 100).await.unwrap();
        assert_eq!(user_after.eco_points, 200);

        let err = store.record_claim(reward.id, user.id, 100).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn claim_deducts_balance_in_the_same_critical_section() {
        let store = MemStorage::new();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        store.award_points(user.id, 100, 0).await.unwrap();
        let reward = store
            .create_reward(NewReward {
                name: "Tote Bag".to_string(),
                description: "Merch".to_string(),
                points_required: 100,
                stock: Some(5),
            })
            .await
            .unwrap();

        // One balance pays for exactly one claim; the second attempt must
        // fail on the balance check, not be absorbed by a clamp.
        let (_, user_after) = store.record_claim(reward.id, user.id, 100).await.unwrap();
        assert_eq!(user_after.eco_points, 0);

        let err = store.record_claim(reward.id, user.id, 100).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let reward = store.reward_by_id(reward.id).await.unwrap().unwrap();
        assert_eq!(reward.stock, Some(4));
    }

    #[tokio::test]
    async fn rejected_update_leaves_challenge_untouched() {
        let store = MemStorage::new();
        let admin = store.create_user(new_user("Admin", "admin@sece.ac.in")).await.unwrap();
        let challenge = store
            .create_challenge(new_challenge(admin.id, 50))
            .await
            .unwrap();

        let err = store
            .update_challenge(
                challenge.id,
                ChallengeUpdate {
                    title: Some("Renamed".to_string()),
                    points: Some(-5),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let unchanged = store.challenge_by_id(challenge.id).await.unwrap().unwrap();
        assert_eq!(unchanged.title, "Plastic-Free Week");
        assert_eq!(unchanged.points, 50);
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependents() {
        let store = MemStorage::new();
        let admin = store.create_user(new_user("Admin", "admin@sece.ac.in")).await.unwrap();
        let user = store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        let challenge = store
            .create_challenge(new_challenge(admin.id, 50))
            .await
            .unwrap();
        store.insert_join(user.id, challenge.id).await.unwrap();
        store
            .insert_post(NewPost {
                author_id: user.id,
                author_name: user.name.clone(),
                content: "hi".to_string(),
                challenge_id: None,
                points_earned: None,
            })
            .await
            .unwrap();

        store.delete_user_cascade(user.id).await.unwrap();

        assert!(store.user_by_id(user.id).await.unwrap().is_none());
        assert!(store.list_feed(10).await.unwrap().is_empty());
        assert!(!store.has_joined(user.id, challenge.id).await.unwrap());
        let challenge = store.challenge_by_id(challenge.id).await.unwrap().unwrap();
        assert_eq!(challenge.participants, 0);
    }

    #[tokio::test]
    async fn json_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("windsurf-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");

        {
            let store = MemStorage::open(&path).unwrap();
            store.create_user(new_user("A", "a@sece.ac.in")).await.unwrap();
        }

        let reopened = MemStorage::open(&path).unwrap();
        let users = reopened.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "a@sece.ac.in");

        std::fs::remove_dir_all(&dir).ok();
    }
}
