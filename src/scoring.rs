//! Applicant scoring.
//!
//! `total = skill_match * rating + time_bonus`. Skill match is the share of
//! required skills the worker has; the time bonus is a small reward for
//! applying early that decays linearly to zero over a day.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Largest possible time bonus, earned by applying at `now`.
pub const MAX_TIME_BONUS: f64 = 0.1;
/// The time bonus reaches zero this many seconds after applying.
pub const TIME_BONUS_DECAY_SECS: f64 = 86_400.0;
pub const MAX_RATING: f64 = 5.0;

/// Per-component score for one application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub skill_score: f64,
    pub rating_score: f64,
    pub time_bonus: f64,
    pub total: f64,
}

pub fn score(
    worker_skills: &BTreeSet<String>,
    required_skills: &BTreeSet<String>,
    rating: Option<f64>,
    applied_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Score {
    let skill_score = skill_match(worker_skills, required_skills);
    let rating_score = rating.unwrap_or(0.0).clamp(0.0, MAX_RATING);
    let time_bonus = time_bonus(applied_at, now);
    Score {
        skill_score,
        rating_score,
        time_bonus,
        total: skill_score * rating_score + time_bonus,
    }
}

/// Fraction of `required` present in `worker`. No requirements is a full match.
pub fn skill_match(worker: &BTreeSet<String>, required: &BTreeSet<String>) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let matched = required.intersection(worker).count();
    matched as f64 / required.len() as f64
}

pub fn time_bonus(applied_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    // Clock skew can put applied_at slightly in the future; treat it as "just now".
    let elapsed = (now - applied_at).num_milliseconds().max(0) as f64 / 1000.0;
    (1.0 - elapsed / TIME_BONUS_DECAY_SECS).max(0.0) * MAX_TIME_BONUS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn skills(s: &[&str]) -> BTreeSet<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_requirements_is_full_match() {
        let now = Utc::now();
        assert_eq!(skill_match(&skills(&["rust"]), &skills(&[])), 1.0);
        assert_eq!(skill_match(&skills(&[]), &skills(&[])), 1.0);
        let s = score(&skills(&[]), &skills(&[]), Some(2.0), now, now);
        assert_eq!(s.skill_score, 1.0);
    }

    #[test]
    fn partial_skill_match() {
        let required = skills(&["go", "postgres"]);
        assert_eq!(skill_match(&skills(&["go"]), &required), 0.5);
        assert_eq!(skill_match(&skills(&["go", "postgres", "k8s"]), &required), 1.0);
        assert_eq!(skill_match(&skills(&["python"]), &required), 0.0);
    }

    #[test]
    fn time_bonus_decays_and_floors_at_zero() {
        let now = Utc::now();
        assert!((time_bonus(now, now) - MAX_TIME_BONUS).abs() < 1e-12);
        let half = time_bonus(now - Duration::hours(12), now);
        assert!((half - 0.05).abs() < 1e-9);
        assert_eq!(time_bonus(now - Duration::hours(24), now), 0.0);
        assert_eq!(time_bonus(now - Duration::days(3), now), 0.0);
    }

    #[test]
    fn future_application_gets_full_bonus() {
        let now = Utc::now();
        let bonus = time_bonus(now + Duration::seconds(30), now);
        assert!((bonus - MAX_TIME_BONUS).abs() < 1e-12);
    }

    #[test]
    fn missing_rating_scores_zero() {
        let now = Utc::now();
        let s = score(&skills(&["go"]), &skills(&["go"]), None, now, now);
        assert_eq!(s.rating_score, 0.0);
        assert!((s.total - MAX_TIME_BONUS).abs() < 1e-12);
    }

    #[test]
    fn rating_is_clamped() {
        let now = Utc::now();
        let high = score(&skills(&[]), &skills(&[]), Some(9.0), now, now);
        let low = score(&skills(&[]), &skills(&[]), Some(-1.0), now, now);
        assert_eq!(high.rating_score, MAX_RATING);
        assert_eq!(low.rating_score, 0.0);
    }

    #[test]
    fn skill_weighted_rating_dominates_time_bonus() {
        // Required {go, postgres}, window of 60 minutes.
        let now = Utc::now();
        let required = skills(&["go", "postgres"]);
        let w1 = score(
            &skills(&["go"]),
            &required,
            Some(4.0),
            now - Duration::minutes(60),
            now,
        );
        let w2 = score(
            &skills(&["go", "postgres"]),
            &required,
            Some(3.0),
            now - Duration::minutes(30),
            now,
        );
        assert!((w1.total - 2.0958).abs() < 1e-3);
        assert!((w2.total - 3.0979).abs() < 1e-3);
        assert!(w2.total > w1.total);
    }
}
