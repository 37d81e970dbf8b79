//! Multi-step workflows over the store
//!
//! Every operation takes the acting `Caller` explicitly and checks its role
//! up front. Precondition failures abort with no partial mutation; the only
//! multi-write path (approval) records the submission transition first, so
//! a racing duplicate decision loses the compare-and-swap before any points
//! move.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::{Error, Result};
use crate::store::{
    Challenge, ChallengeStatus, JoinRecord, NewPost, NewSubmission, Post, PostComment, RewardClaim,
    Role, Store, Submission, User, VerificationStatus,
};

/// Verification decision as submitted by an admin or faculty reviewer.
#[derive(Debug, Clone, Deserialize)]
pub struct Decision {
    pub approved: bool,
    pub comment: Option<String>,
}

/// Result of a verification decision.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub submission: Submission,
    /// New point total, present only when the decision was an approval.
    pub new_total: Option<i64>,
}

/// Decide a pending submission.
///
/// On approval: transition the submission out of `pending` (the durable
/// idempotency guard), award the challenge's points, bump the completion
/// counter, recompute badges, and append an achievement post to the feed.
/// On rejection only the transition happens.
pub async fn verify_submission(
    store: &dyn Store,
    caller: Caller,
    submission_id: Uuid,
    decision: Decision,
) -> Result<VerifyOutcome> {
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }

    let status = if decision.approved {
        VerificationStatus::Approved
    } else {
        VerificationStatus::Rejected
    };

    // CAS: fails with Conflict if another decision already landed.
    let submission = store
        .transition_submission(submission_id, status, caller.user_id, decision.comment)
        .await?;

    if !decision.approved {
        info!("Submission {} rejected by {}", submission.id, caller.user_id);
        return Ok(VerifyOutcome {
            submission,
            new_total: None,
        });
    }

    let challenge = store
        .challenge_by_id(submission.challenge_id)
        .await?
        .ok_or(Error::NotFound("challenge"))?;

    let student = store
        .award_points(submission.student_id, challenge.points, 1)
        .await?;

    let content = format!(
        "Successfully completed '{}' and earned {} eco-points! {}",
        challenge.title, challenge.points, submission.proof_description
    );
    store
        .insert_post(NewPost {
            author_id: student.id,
            author_name: student.name.clone(),
            content,
            challenge_id: Some(challenge.id),
            points_earned: Some(challenge.points),
        })
        .await?;

    info!(
        "Submission {} approved by {}: {} +{} points (total {})",
        submission.id, caller.user_id, student.name, challenge.points, student.eco_points
    );

    Ok(VerifyOutcome {
        submission,
        new_total: Some(student.eco_points),
    })
}

/// Join an active challenge. The join record and the participant counter
/// move together; a duplicate join is a conflict with no counter change.
pub async fn join_challenge(
    store: &dyn Store,
    caller: Caller,
    challenge_id: Uuid,
) -> Result<JoinRecord> {
    if caller.role != Role::Student {
        return Err(Error::Forbidden("only students can join challenges".into()));
    }

    let challenge = store
        .challenge_by_id(challenge_id)
        .await?
        .ok_or(Error::NotFound("challenge"))?;

    if challenge.status != ChallengeStatus::Active {
        return Err(Error::InvalidInput("challenge not active".into()));
    }

    let record = store.insert_join(caller.user_id, challenge_id).await?;
    info!("Student {} joined challenge {}", caller.user_id, challenge_id);
    Ok(record)
}

/// Proof payload for a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct Proof {
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Submit proof of completion for a joined, active challenge.
pub async fn submit_proof(
    store: &dyn Store,
    caller: Caller,
    challenge_id: Uuid,
    proof: Proof,
) -> Result<Submission> {
    if caller.role != Role::Student {
        return Err(Error::Forbidden("only students can submit proof".into()));
    }
    if proof.description.trim().is_empty() {
        return Err(Error::InvalidInput("proof description is required".into()));
    }

    let challenge = store
        .challenge_by_id(challenge_id)
        .await?
        .ok_or(Error::NotFound("challenge"))?;
    if challenge.status != ChallengeStatus::Active {
        return Err(Error::InvalidInput("challenge not active".into()));
    }

    if !store.has_joined(caller.user_id, challenge_id).await? {
        return Err(Error::InvalidInput("join the challenge first".into()));
    }

    store
        .create_submission(NewSubmission {
            student_id: caller.user_id,
            challenge_id,
            proof_description: proof.description,
            proof_files: proof.files,
        })
        .await
}

/// Claim a reward, deducting its point cost. Insufficient points and
/// exhausted stock are conflicts; the deduction never removes badges.
pub async fn claim_reward(
    store: &dyn Store,
    caller: Caller,
    reward_id: Uuid,
) -> Result<(RewardClaim, User)> {
    let reward = store
        .reward_by_id(reward_id)
        .await?
        .ok_or(Error::NotFound("reward"))?;

    // Balance check, deduction, stock decrement and claim record are one
    // atomic store operation; a racing second claim loses inside it.
    let (claim, user) = store
        .record_claim(reward_id, caller.user_id, reward.points_required)
        .await?;

    info!(
        "User {} claimed reward '{}' for {} points",
        user.name, reward.name, reward.points_required
    );

    Ok((claim, user))
}

/// Admin-only hard delete; cascades to the user's posts, submissions and
/// join records.
pub async fn delete_user(store: &dyn Store, caller: Caller, user_id: Uuid) -> Result<()> {
    if caller.role != Role::Admin {
        return Err(Error::Forbidden("admin access required".into()));
    }
    store.delete_user_cascade(user_id).await
}

/// Create a challenge (admin/faculty only).
pub async fn create_challenge(
    store: &dyn Store,
    caller: Caller,
    new: crate::store::NewChallenge,
) -> Result<Challenge> {
    if !caller.role.can_review() {
        return Err(Error::Forbidden("admin or faculty access required".into()));
    }
    if new.points <= 0 {
        return Err(Error::InvalidInput("points must be positive".into()));
    }
    if new.title.trim().is_empty() {
        return Err(Error::InvalidInput("title is required".into()));
    }
    store.create_challenge(new).await
}

/// Add a comment to a feed post on behalf of the caller.
pub async fn comment_on_post(
    store: &dyn Store,
    caller: Caller,
    post_id: Uuid,
    content: String,
) -> Result<Post> {
    if content.trim().is_empty() {
        return Err(Error::InvalidInput("comment content is required".into()));
    }
    let user = store
        .user_by_id(caller.user_id)
        .await?
        .ok_or(Error::NotFound("user"))?;

    store
        .add_comment(
            post_id,
            PostComment {
                author_id: user.id,
                author_name: user.name,
                content,
                created_at: Utc::now(),
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_storage::MemStorage;
    use crate::store::{NewChallenge, NewReward, NewUser, SubmissionFilter};

    async fn setup() -> (MemStorage, Caller, Caller) {
        let store = MemStorage::new();

        let admin = store
            .create_user(NewUser {
                name: "Dr. Rajesh Kumar".to_string(),
                email: "admin@sece.ac.in".to_string(),
                password_hash: "x".to_string(),
                role: Role::Admin,
                department: Some("Environmental Sciences".to_string()),
                year: None,
            })
            .await
            .unwrap();

        let student = store
            .create_user(NewUser {
                name: "Priya Sharma".to_string(),
                email: "priya.sharma@sece.ac.in".to_string(),
                password_hash: "x".to_string(),
                role: Role::Student,
                department: Some("Environmental Science".to_string()),
                year: Some("3rd Year".to_string()),
            })
            .await
            .unwrap();

        (
            store,
            Caller::new(admin.id, Role::Admin),
            Caller::new(student.id, Role::Student),
        )
    }

    async fn active_challenge(store: &MemStorage, admin: Caller, points: i64) -> Challenge {
        create_challenge(
            store,
            admin,
            NewChallenge {
                title: "Plastic-Free Week Challenge".to_string(),
                description: "Eliminate single-use plastics for a week".to_string(),
                category: "Waste Management".to_string(),
                difficulty: "Medium".to_string(),
                points,
                created_by: admin.user_id,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_approval_flow() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;

        join_challenge(&store, student, challenge.id).await.unwrap();

        let submission = submit_proof(
            &store,
            student,
            challenge.id,
            Proof {
                description: "Used a reusable bottle all week".to_string(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let outcome = verify_submission(
            &store,
            admin,
            submission.id,
            Decision {
                approved: true,
                comment: Some("nice work".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.new_total, Some(50));
        assert_eq!(
            outcome.submission.verification_status,
            VerificationStatus::Approved
        );
        assert_eq!(outcome.submission.reviewer_comment.as_deref(), Some("nice work"));

        let user = store.user_by_id(student.user_id).await.unwrap().unwrap();
        assert_eq!(user.eco_points, 50);
        assert_eq!(user.challenges_completed, 1);
        assert!(user.badges.iter().any(|b| b == "Green Beginner"));

        // Achievement post landed in the feed.
        let feed = store.list_feed(10).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].challenge_id, Some(challenge.id));
        assert_eq!(feed[0].points_earned, Some(50));

        // A second approve is a conflict and points stay put.
        let err = verify_submission(
            &store,
            admin,
            submission.id,
            Decision {
                approved: true,
                comment: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let user = store.user_by_id(student.user_id).await.unwrap().unwrap();
        assert_eq!(user.eco_points, 50);
        assert_eq!(store.list_feed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejection_has_no_side_effects() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;
        join_challenge(&store, student, challenge.id).await.unwrap();
        let submission = submit_proof(
            &store,
            student,
            challenge.id,
            Proof {
                description: "half done".to_string(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let outcome = verify_submission(
            &store,
            admin,
            submission.id,
            Decision {
                approved: false,
                comment: Some("proof is incomplete".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.new_total, None);
        assert_eq!(
            outcome.submission.verification_status,
            VerificationStatus::Rejected
        );
        let user = store.user_by_id(student.user_id).await.unwrap().unwrap();
        assert_eq!(user.eco_points, 0);
        assert_eq!(user.challenges_completed, 0);
        assert!(store.list_feed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn students_cannot_verify() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;
        join_challenge(&store, student, challenge.id).await.unwrap();
        let submission = submit_proof(
            &store,
            student,
            challenge.id,
            Proof {
                description: "done".to_string(),
                files: vec![],
            },
        )
        .await
        .unwrap();

        let err = verify_submission(
            &store,
            student,
            submission.id,
            Decision {
                approved: true,
                comment: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        // Still pending afterwards.
        let pending = store
            .list_submissions(SubmissionFilter {
                status: Some(VerificationStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn verify_missing_submission_is_not_found() {
        let (store, admin, _) = setup().await;
        let err = verify_submission(
            &store,
            admin,
            Uuid::new_v4(),
            Decision {
                approved: true,
                comment: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn join_archived_challenge_fails() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;
        store.archive_challenge(challenge.id).await.unwrap();

        let err = join_challenge(&store, student, challenge.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn double_join_is_conflict_counter_moves_once() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;

        join_challenge(&store, student, challenge.id).await.unwrap();
        let err = join_challenge(&store, student, challenge.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let challenge = store.challenge_by_id(challenge.id).await.unwrap().unwrap();
        assert_eq!(challenge.participants, 1);
    }

    #[tokio::test]
    async fn faculty_can_verify() {
        let (store, admin, student) = setup().await;
        let faculty_user = store
            .create_user(NewUser {
                name: "Prof. Mehta".to_string(),
                email: "mehta@sece.ac.in".to_string(),
                password_hash: "x".to_string(),
                role: Role::Faculty,
                department: None,
                year: None,
            })
            .await
            .unwrap();
        let faculty = Caller::new(faculty_user.id, Role::Faculty);

        let challenge = active_challenge(&store, admin, 75).await;
        join_challenge(&store, student, challenge.id).await.unwrap();
        let submission = submit_proof(
            &store,
            student,
            challenge.id,
            Proof {
                description: "planted a tree".to_string(),
                files: vec!["photo.jpg".to_string()],
            },
        )
        .await
        .unwrap();

        let outcome = verify_submission(
            &store,
            faculty,
            submission.id,
            Decision {
                approved: true,
                comment: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.new_total, Some(75));
        assert_eq!(outcome.submission.reviewed_by, Some(faculty_user.id));
    }

    #[tokio::test]
    async fn submit_requires_join() {
        let (store, admin, student) = setup().await;
        let challenge = active_challenge(&store, admin, 50).await;

        let err = submit_proof(
            &store,
            student,
            challenge.id,
            Proof {
                description: "done".to_string(),
                files: vec![],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn reward_claim_deducts_points() {
        let (store, _, student) = setup().await;
        store.award_points(student.user_id, 150, 0).await.unwrap();

        let reward = store
            .create_reward(NewReward {
                name: "Eco Warrior Badge".to_string(),
                description: "Certificate".to_string(),
                points_required: 100,
                stock: Some(5),
            })
            .await
            .unwrap();

        let (_claim, user) = claim_reward(&store, student, reward.id).await.unwrap();
        assert_eq!(user.eco_points, 50);
        // Badges earned at 150 points survive the deduction.
        assert!(user.badges.iter().any(|b| b == "Eco Learner"));

        let reward = store.reward_by_id(reward.id).await.unwrap().unwrap();
        assert_eq!(reward.stock, Some(4));
    }

    #[tokio::test]
    async fn reward_claim_insufficient_points_is_conflict() {
        let (store, _, student) = setup().await;
        let reward = store
            .create_reward(NewReward {
                name: "Tote Bag".to_string(),
                description: "Merch".to_string(),
                points_required: 100,
                stock: None,
            })
            .await
            .unwrap();

        let err = claim_reward(&store, student, reward.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let user = store.user_by_id(student.user_id).await.unwrap().unwrap();
        assert_eq!(user.eco_points, 0);
    }

    #[tokio::test]
    async fn exact_balance_pays_for_one_claim_only() {
        let (store, _, student) = setup().await;
        store.award_points(student.user_id, 100, 0).await.unwrap();

        let reward = store
            .create_reward(NewReward {
                name: "Campus Cafe Voucher".to_string(),
                description: "One free coffee".to_string(),
                points_required: 100,
                stock: Some(5),
            })
            .await
            .unwrap();

        let (_, user) = claim_reward(&store, student, reward.id).await.unwrap();
        assert_eq!(user.eco_points, 0);

        // The second claim must hit the balance check inside the atomic
        // deduction; the zero-clamp never turns it into a free redemption.
        let err = claim_reward(&store, student, reward.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let reward = store.reward_by_id(reward.id).await.unwrap().unwrap();
        assert_eq!(reward.stock, Some(4));
        let user = store.user_by_id(student.user_id).await.unwrap().unwrap();
        assert_eq!(user.eco_points, 0);
    }

    #[tokio::test]
    async fn delete_user_requires_admin() {
        let (store, admin, student) = setup().await;

        let err = delete_user(&store, student, admin.user_id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        delete_user(&store, admin, student.user_id).await.unwrap();
        assert!(store.user_by_id(student.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn students_cannot_create_challenges() {
        let (store, _, student) = setup().await;
        let err = create_challenge(
            &store,
            student,
            NewChallenge {
                title: "x".to_string(),
                description: "y".to_string(),
                category: "z".to_string(),
                difficulty: "Easy".to_string(),
                points: 10,
                created_by: student.user_id,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }
}
