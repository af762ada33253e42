//! Feed ranking.
//!
//! A fixed heuristic: linear recency decay plus weighted engagement, scaled
//! by connection and industry affinity and damped for the viewer's own posts.
//! The arithmetic is applied in a fixed order so equal inputs produce
//! bit-identical scores and therefore identical orderings.

use std::collections::HashSet;

use serde::Serialize;
use talentgrid_types::FeedPost;
use time::OffsetDateTime;
use uuid::Uuid;

const RECENCY_CEILING: f64 = 100.0;
const RECENCY_DECAY_PER_HOUR: f64 = 2.0;
const RECENCY_WEIGHT: f64 = 1.2;
const LIKE_WEIGHT: f64 = 1.0;
const COMMENT_WEIGHT: f64 = 2.0;
const REPOST_WEIGHT: f64 = 3.0;
const ENGAGEMENT_WEIGHT: f64 = 1.1;
const CONNECTION_MULTIPLIER: f64 = 1.5;
const INDUSTRY_MULTIPLIER: f64 = 1.3;
const SELF_AUTHORED_MULTIPLIER: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Engagement {
    pub likes: u32,
    pub comments: u32,
    pub reposts: u32,
}

/// Signals the scorer needs from a feed item.
pub trait Rankable {
    fn author_id(&self) -> Uuid;
    fn created_at(&self) -> OffsetDateTime;
    fn engagement(&self) -> Engagement;
    fn industry(&self) -> Option<&str>;
}

impl Rankable for FeedPost {
    fn author_id(&self) -> Uuid {
        self.author_id
    }

    fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    fn engagement(&self) -> Engagement {
        Engagement {
            likes: self.likes_count,
            comments: self.comments_count,
            reposts: self.reposts_count,
        }
    }

    fn industry(&self) -> Option<&str> {
        self.industry.as_deref()
    }
}

/// Who is looking, and when.
#[derive(Debug, Clone)]
pub struct ViewerContext {
    pub viewer_id: Uuid,
    pub connections: HashSet<Uuid>,
    pub industry: Option<String>,
    pub now: OffsetDateTime,
}

impl ViewerContext {
    pub fn new(viewer_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            viewer_id,
            connections: HashSet::new(),
            industry: None,
            now,
        }
    }

    pub fn with_connections(mut self, connections: impl IntoIterator<Item = Uuid>) -> Self {
        self.connections.extend(connections);
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    fn shares_industry(&self, industry: Option<&str>) -> bool {
        match (self.industry.as_deref(), industry) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        }
    }
}

/// Per-component view of a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub engagement: f64,
    pub connection: bool,
    pub shared_industry: bool,
    pub self_authored: bool,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem<T> {
    pub item: T,
    pub score: f64,
}

pub fn explain<T: Rankable>(item: &T, context: &ViewerContext) -> ScoreBreakdown {
    let age_hours = (context.now - item.created_at()).as_seconds_f64() / 3600.0;
    let age_hours = age_hours.max(0.0);
    let recency = (RECENCY_CEILING - age_hours * RECENCY_DECAY_PER_HOUR).max(0.0) * RECENCY_WEIGHT;

    let signals = item.engagement();
    let engagement = (f64::from(signals.likes) * LIKE_WEIGHT
        + f64::from(signals.comments) * COMMENT_WEIGHT
        + f64::from(signals.reposts) * REPOST_WEIGHT)
        * ENGAGEMENT_WEIGHT;

    let author = item.author_id();
    let connection = context.connections.contains(&author);
    let shared_industry = context.shares_industry(item.industry());
    let self_authored = author == context.viewer_id;

    let mut total = recency + engagement;
    if connection {
        total *= CONNECTION_MULTIPLIER;
    }
    if shared_industry {
        total *= INDUSTRY_MULTIPLIER;
    }
    if self_authored {
        total *= SELF_AUTHORED_MULTIPLIER;
    }

    ScoreBreakdown {
        recency,
        engagement,
        connection,
        shared_industry,
        self_authored,
        total,
    }
}

pub fn score<T: Rankable>(item: &T, context: &ViewerContext) -> f64 {
    explain(item, context).total
}

/// Stable sort by score, highest first. Ties keep their input order.
pub fn rank<T: Rankable>(items: Vec<T>, context: &ViewerContext) -> Vec<RankedItem<T>> {
    let mut ranked: Vec<RankedItem<T>> = items
        .into_iter()
        .map(|item| {
            let score = score(&item, context);
            RankedItem { item, score }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;

    const NOW: OffsetDateTime = datetime!(2025-05-10 12:00 UTC);

    fn post(author: Uuid, hours_old: i64, likes: u32, comments: u32, reposts: u32) -> FeedPost {
        FeedPost {
            id: Uuid::new_v4(),
            author_id: author,
            content: String::new(),
            industry: None,
            likes_count: likes,
            comments_count: comments,
            reposts_count: reposts,
            created_at: NOW - Duration::hours(hours_old),
        }
    }

    #[test]
    fn fresh_post_scores_full_recency() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW);
        let item = post(Uuid::new_v4(), 0, 0, 0, 0);
        assert_eq!(score(&item, &viewer), 120.0);
    }

    #[test]
    fn recency_reaches_zero_at_fifty_hours() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW);
        assert_eq!(score(&post(Uuid::new_v4(), 50, 0, 0, 0), &viewer), 0.0);
        assert_eq!(score(&post(Uuid::new_v4(), 80, 0, 0, 0), &viewer), 0.0);
    }

    #[test]
    fn future_timestamps_do_not_exceed_ceiling() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW);
        let item = post(Uuid::new_v4(), -5, 0, 0, 0);
        assert_eq!(explain(&item, &viewer).recency, 120.0);
    }

    #[test]
    fn engagement_weights_comments_and_reposts() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW);
        let breakdown = explain(&post(Uuid::new_v4(), 50, 1, 1, 1), &viewer);
        assert_eq!(breakdown.engagement, (1.0 + 2.0 + 3.0) * 1.1);
    }

    #[test]
    fn connection_scores_exactly_one_and_a_half_times() {
        let friend = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW).with_connections([friend]);

        let from_friend = post(friend, 7, 4, 2, 1);
        let from_stranger = post(stranger, 7, 4, 2, 1);

        assert_eq!(
            score(&from_friend, &viewer),
            score(&from_stranger, &viewer) * 1.5
        );
    }

    #[test]
    fn shared_industry_ignores_ascii_case() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW).with_industry("FinTech");
        let mut item = post(Uuid::new_v4(), 0, 0, 0, 0);
        item.industry = Some("fintech".to_string());

        assert_eq!(score(&item, &viewer), 120.0 * 1.3);
    }

    #[test]
    fn own_posts_are_damped() {
        let me = Uuid::new_v4();
        let viewer = ViewerContext::new(me, NOW);
        assert_eq!(score(&post(me, 0, 0, 0, 0), &viewer), 60.0);
    }

    #[test]
    fn ranking_is_stable_for_ties() {
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW);
        let first = post(Uuid::new_v4(), 3, 1, 0, 0);
        let second = post(Uuid::new_v4(), 3, 1, 0, 0);
        let fresher = post(Uuid::new_v4(), 1, 1, 0, 0);
        let ids = [first.id, second.id, fresher.id];

        let ranked = rank(vec![first, second, fresher], &viewer);
        let order: Vec<Uuid> = ranked.iter().map(|r| r.item.id).collect();

        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
    }

    #[test]
    fn ranking_is_deterministic_across_calls() {
        let friend = Uuid::new_v4();
        let viewer = ViewerContext::new(Uuid::new_v4(), NOW)
            .with_connections([friend])
            .with_industry("design");
        let items: Vec<FeedPost> = (0..40)
            .map(|i| {
                let author = if i % 3 == 0 { friend } else { Uuid::new_v4() };
                post(author, i % 60, (i * 7 % 11) as u32, (i % 4) as u32, (i % 2) as u32)
            })
            .collect();

        let a: Vec<(Uuid, u64)> = rank(items.clone(), &viewer)
            .into_iter()
            .map(|r| (r.item.id, r.score.to_bits()))
            .collect();
        let b: Vec<(Uuid, u64)> = rank(items, &viewer)
            .into_iter()
            .map(|r| (r.item.id, r.score.to_bits()))
            .collect();

        assert_eq!(a, b);
    }
}
