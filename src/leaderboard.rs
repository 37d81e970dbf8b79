//! Leaderboard and department analytics
//!
//! Derived, read-only views over the user store. Ranking is competition
//! style: rank = 1 + number of users with strictly more points, so tied
//! users share a rank. Ties keep the store's insertion order, which makes
//! repeated calls stable when nothing was written in between.

use serde::Serialize;
use uuid::Uuid;

use crate::store::{Role, User};

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: Uuid,
    pub name: String,
    pub department: Option<String>,
    pub eco_points: i64,
    pub badges: Vec<String>,
    pub challenges_completed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentStanding {
    pub rank: u32,
    pub department: String,
    pub total_points: i64,
    pub average_points: f64,
    pub student_count: u32,
}

/// Students only; admins and faculty never appear on the leaderboard.
fn ranked_students(users: &[User]) -> Vec<&User> {
    users.iter().filter(|u| u.role == Role::Student).collect()
}

fn entry(user: &User, rank: u32) -> LeaderboardEntry {
    LeaderboardEntry {
        rank,
        user_id: user.id,
        name: user.name.clone(),
        department: user.department.clone(),
        eco_points: user.eco_points,
        badges: user.badges.clone(),
        challenges_completed: user.challenges_completed,
    }
}

fn rank_of(points: i64, students: &[&User]) -> u32 {
    1 + students.iter().filter(|u| u.eco_points > points).count() as u32
}

/// Global top-N by descending eco points.
pub fn global_top(users: &[User], limit: usize) -> Vec<LeaderboardEntry> {
    let students = ranked_students(users);

    let mut sorted = students.clone();
    sorted.sort_by_key(|u| std::cmp::Reverse(u.eco_points));

    sorted
        .iter()
        .take(limit)
        .map(|u| entry(u, rank_of(u.eco_points, &students)))
        .collect()
}

/// Top-N within one department, ranked against that department only.
pub fn department_top(users: &[User], department: &str, limit: usize) -> Vec<LeaderboardEntry> {
    let students: Vec<&User> = ranked_students(users)
        .into_iter()
        .filter(|u| u.department.as_deref() == Some(department))
        .collect();

    let mut sorted = students.clone();
    sorted.sort_by_key(|u| std::cmp::Reverse(u.eco_points));

    sorted
        .iter()
        .take(limit)
        .map(|u| entry(u, rank_of(u.eco_points, &students)))
        .collect()
}

/// Global rank of one user, if they exist and are a student.
pub fn user_rank(users: &[User], user_id: Uuid) -> Option<u32> {
    let students = ranked_students(users);
    let user = students.iter().find(|u| u.id == user_id)?;
    Some(rank_of(user.eco_points, &students))
}

/// Per-department totals and averages, sorted by total points descending.
pub fn department_rankings(users: &[User]) -> Vec<DepartmentStanding> {
    let mut totals: Vec<(String, i64, u32)> = Vec::new();

    for user in ranked_students(users) {
        let Some(dept) = user.department.as_deref() else {
            continue;
        };
        match totals.iter_mut().find(|(d, _, _)| d == dept) {
            Some((_, points, count)) => {
                *points += user.eco_points;
                *count += 1;
            }
            None => totals.push((dept.to_string(), user.eco_points, 1)),
        }
    }

    totals.sort_by_key(|(_, points, _)| std::cmp::Reverse(*points));

    totals
        .into_iter()
        .enumerate()
        .map(|(i, (department, total_points, student_count))| DepartmentStanding {
            rank: (i + 1) as u32,
            department,
            total_points,
            average_points: total_points as f64 / student_count as f64,
            student_count,
        })
        .collect()
}
