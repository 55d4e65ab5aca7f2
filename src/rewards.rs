//! Reward aggregation.
//!
//! Everything here is derived on demand from task and rating history; no
//! points or achievements are ever stored. Computing twice over the same
//! history gives the same answer.

use crate::blob::BlobStore;
use crate::exchange::{Exchange, ExchangeError};
use crate::models::{Actor, Rating, Task};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Bonus per 5-star rating on a completed task.
pub const FIVE_STAR_BONUS: u32 = 20;
/// Bonus when the average rating is at least 4.5 over enough ratings.
pub const HIGH_PERFORMER_BONUS: u32 = 100;
/// Ratings needed before an average counts as sustained.
pub const HIGH_PERFORMER_MIN_RATINGS: u32 = 3;
pub const POINTS_PER_LEVEL: u32 = 100;

/// Number of reviews shown on a profile.
const RECENT_REVIEWS: usize = 5;

/// One task with every rating submitted on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHistory {
    pub task: Task,
    pub ratings: Vec<Rating>,
}

// ── Achievements ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AchievementKind {
    FirstStep,
    GettingHot,
    PerfectTen,
    StarPerformer,
    ExcellenceAward,
    PointMaster,
    TaskChampion,
    Legend,
}

impl AchievementKind {
    pub fn icon(self) -> &'static str {
        match self {
            AchievementKind::FirstStep => "🎯",
            AchievementKind::GettingHot => "🔥",
            AchievementKind::PerfectTen => "💯",
            AchievementKind::StarPerformer => "⭐",
            AchievementKind::ExcellenceAward => "👑",
            AchievementKind::PointMaster => "💎",
            AchievementKind::TaskChampion => "🏆",
            AchievementKind::Legend => "🌟",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            AchievementKind::FirstStep => "First Step",
            AchievementKind::GettingHot => "Getting Hot",
            AchievementKind::PerfectTen => "Perfect Ten",
            AchievementKind::StarPerformer => "Star Performer",
            AchievementKind::ExcellenceAward => "Excellence Award",
            AchievementKind::PointMaster => "Point Master",
            AchievementKind::TaskChampion => "Task Champion",
            AchievementKind::Legend => "Legend",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AchievementKind::FirstStep => "Completed your first task",
            AchievementKind::GettingHot => "Completed 5 tasks",
            AchievementKind::PerfectTen => "Completed 10 tasks",
            AchievementKind::StarPerformer => "Received 3+ five-star ratings",
            AchievementKind::ExcellenceAward => "Maintained 4.5+ average rating",
            AchievementKind::PointMaster => "Earned 500+ credit points",
            AchievementKind::TaskChampion => "Complete 20 tasks",
            AchievementKind::Legend => "Earn 1000 credit points",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub kind: AchievementKind,
    pub icon: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub earned: bool,
}

impl Achievement {
    fn new(kind: AchievementKind, earned: bool) -> Self {
        Achievement {
            kind,
            icon: kind.icon(),
            title: kind.title(),
            description: kind.description(),
            earned,
        }
    }
}

// ── Levels ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LevelBadge {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl LevelBadge {
    pub fn for_level(level: u32) -> Self {
        match level {
            10.. => LevelBadge::Diamond,
            7..=9 => LevelBadge::Platinum,
            5..=6 => LevelBadge::Gold,
            3..=4 => LevelBadge::Silver,
            _ => LevelBadge::Bronze,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LevelBadge::Bronze => "🥉 Bronze",
            LevelBadge::Silver => "🥈 Silver",
            LevelBadge::Gold => "⭐ Gold",
            LevelBadge::Platinum => "🏆 Platinum",
            LevelBadge::Diamond => "💎 Diamond",
        }
    }
}

/// `(level, points_to_next_level)` for a point total. Levels start at 1.
pub fn level_progress(total_points: u32) -> (u32, u32) {
    let level = total_points / POINTS_PER_LEVEL + 1;
    let next = u64::from(level) * u64::from(POINTS_PER_LEVEL);
    (level, (next - u64::from(total_points)) as u32)
}

// ── Summary ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSummary {
    pub user: String,
    pub total_points: u32,
    pub level: u32,
    pub points_to_next_level: u32,
    pub badge: LevelBadge,
    pub tasks_completed: u32,
    pub rating_count: u32,
    pub five_star_count: u32,
    /// 0 when there are no ratings.
    pub average_rating: f64,
    pub achievements: Vec<Achievement>,
}

/// Tasks on which `user` is an accepted applicant, with their ratings.
fn completed_by<'a>(user: &'a str, history: &'a [TaskHistory]) -> impl Iterator<Item = &'a TaskHistory> {
    history.iter().filter(move |h| h.task.is_accepted(user))
}

/// Derive `user`'s points, level and achievements.
///
/// Every rating on a completed task counts toward the user, whoever the
/// rating names as candidate.
pub fn compute_rewards(user: &str, history: &[TaskHistory]) -> RewardSummary {
    let mut total_points = 0u32;
    let mut tasks_completed = 0u32;
    let mut rating_count = 0u32;
    let mut rating_sum = 0u32;
    let mut five_star_count = 0u32;

    for entry in completed_by(user, history) {
        tasks_completed = tasks_completed.saturating_add(1);
        total_points = total_points.saturating_add(entry.task.reward_points());
        for rating in &entry.ratings {
            rating_count = rating_count.saturating_add(1);
            rating_sum = rating_sum.saturating_add(u32::from(rating.rating));
            if rating.rating == 5 {
                five_star_count = five_star_count.saturating_add(1);
                total_points = total_points.saturating_add(FIVE_STAR_BONUS);
            }
        }
    }

    // avg >= 4.5  <=>  2 * sum >= 9 * count
    let high_average =
        rating_count >= HIGH_PERFORMER_MIN_RATINGS
            && u64::from(rating_sum) * 2 >= u64::from(rating_count) * 9;
    if high_average {
        total_points = total_points.saturating_add(HIGH_PERFORMER_BONUS);
    }

    let average_rating = if rating_count == 0 {
        0.0
    } else {
        f64::from(rating_sum) / f64::from(rating_count)
    };
    let (level, points_to_next_level) = level_progress(total_points);

    let mut achievements = Vec::new();
    let earned = [
        (AchievementKind::FirstStep, tasks_completed >= 1),
        (AchievementKind::GettingHot, tasks_completed >= 5),
        (AchievementKind::PerfectTen, tasks_completed >= 10),
        (AchievementKind::StarPerformer, five_star_count >= 3),
        (AchievementKind::ExcellenceAward, high_average),
        (AchievementKind::PointMaster, total_points >= 500),
    ];
    for (kind, unlocked) in earned {
        if unlocked {
            achievements.push(Achievement::new(kind, true));
        }
    }
    // Shown greyed out until reached, then dropped.
    if tasks_completed < 20 {
        achievements.push(Achievement::new(AchievementKind::TaskChampion, false));
    }
    if total_points < 1000 {
        achievements.push(Achievement::new(AchievementKind::Legend, false));
    }

    RewardSummary {
        user: user.to_string(),
        total_points,
        level,
        points_to_next_level,
        badge: LevelBadge::for_level(level),
        tasks_completed,
        rating_count,
        five_star_count,
        average_rating,
        achievements,
    }
}

// ── Profile ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub id: String,
    pub title: String,
    pub points: u32,
    pub completed_date: Option<DateTime<Utc>>,
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: String,
    pub completed_tasks: Vec<CompletedTask>,
    pub total_tasks: usize,
    pub total_earned: u32,
    /// Rounded to one decimal.
    pub average_rating: f64,
    pub recent_reviews: Vec<Rating>,
}

pub fn compute_profile(user: &str, history: &[TaskHistory]) -> Profile {
    let completed_tasks: Vec<CompletedTask> = completed_by(user, history)
        .map(|h| CompletedTask {
            id: h.task.id.clone(),
            title: h.task.title.clone(),
            points: h.task.reward_points(),
            completed_date: h.task.created_at,
            ratings: h.ratings.clone(),
        })
        .collect();

    let total_earned = completed_tasks.iter().fold(0u32, |acc, t| acc.saturating_add(t.points));

    let mut reviews: Vec<Rating> = completed_tasks
        .iter()
        .flat_map(|t| t.ratings.iter().cloned())
        .collect();
    let average_rating = if reviews.is_empty() {
        0.0
    } else {
        let sum: u64 = reviews.iter().map(|r| u64::from(r.rating)).sum();
        let avg = sum as f64 / reviews.len() as f64;
        (avg * 10.0).round() / 10.0
    };
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    reviews.truncate(RECENT_REVIEWS);

    Profile {
        user: user.to_string(),
        total_tasks: completed_tasks.len(),
        completed_tasks,
        total_earned,
        average_rating,
        recent_reviews: reviews,
    }
}

// ── Leaderboard ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub points: u32,
    pub tasks: u32,
    pub rating: f64,
    pub badge: LevelBadge,
}

/// Every accepted applicant ranked by points, ties broken by name.
pub fn compute_leaderboard(history: &[TaskHistory], limit: usize) -> Vec<LeaderboardEntry> {
    let names: BTreeSet<&str> = history
        .iter()
        .flat_map(|h| h.task.accepted_applicants().map(|(_, a)| a.name.as_str()))
        .collect();

    let mut summaries: Vec<RewardSummary> = names
        .into_iter()
        .map(|name| compute_rewards(name, history))
        .collect();
    summaries.sort_by(|a, b| b.total_points.cmp(&a.total_points).then_with(|| a.user.cmp(&b.user)));

    summaries
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, s)| LeaderboardEntry {
            rank: i + 1,
            name: s.user,
            points: s.total_points,
            tasks: s.tasks_completed,
            rating: (s.average_rating * 10.0).round() / 10.0,
            badge: s.badge,
        })
        .collect()
}

// ── Exchange ───────────────────────────────────────────────────

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    /// Every task with its ratings.
    pub fn task_history(&self) -> Result<Vec<TaskHistory>, ExchangeError> {
        self.tasks()?
            .into_iter()
            .map(|task| {
                let ratings = self.ratings(&task.id)?;
                Ok(TaskHistory { task, ratings })
            })
            .collect()
    }

    pub fn rewards(&self, user: &Actor) -> Result<RewardSummary, ExchangeError> {
        Ok(compute_rewards(user.name(), &self.task_history()?))
    }

    pub fn profile(&self, user: &Actor) -> Result<Profile, ExchangeError> {
        Ok(compute_profile(user.name(), &self.task_history()?))
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, ExchangeError> {
        Ok(compute_leaderboard(&self.task_history()?, limit))
    }
}

// ── Tests ──────────────────────────────────────────────────────
