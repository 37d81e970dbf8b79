//! Windsurf - Campus sustainability engagement platform
//!
//! Students join sustainability challenges, submit proof of completion,
//! and earn eco-points and badges. Admins and faculty verify submissions;
//! approvals award points exactly once and announce the achievement on
//! the community feed.
//!
//! # How it works
//!
//! 1. Students register and join active challenges
//! 2. Students submit proof of completion (description plus file refs)
//! 3. Admins or faculty approve or reject pending submissions
//! 4. Approval awards the challenge's points, recomputes badges, and
//!    posts to the feed; a submission is decided at most once
//! 5. Leaderboards rank students by eco-points, competition style
//!
//! # Consistency guarantees
//!
//! - A submission leaves `pending` exactly once (compare-and-swap)
//! - Point totals never go negative; badges are never revoked
//! - Join records and participant counters move together
//! - Reward stock decrements atomically with the claim record

pub mod auth;
pub mod badges;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod mem_storage;
pub mod pg_storage;
pub mod server;
pub mod store;
pub mod workflow;

pub use auth::Caller;
pub use badges::{apply_award, BADGE_TIERS};
pub use config::Config;
pub use error::{Error, Result};
pub use mem_storage::MemStorage;
pub use pg_storage::PgStorage;
pub use store::{Role, Store};
