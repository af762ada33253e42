//! End-to-end feed scenario against the in-memory backend.
//!
//! Mounts a feed façade on a cold cache, pages once, publishes a post through
//! the mutation service and waits for the realtime refresh to surface it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use talentgrid_types::{FeedPost, tables};
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::info;
use uuid::Uuid;

use crate::backend::MemoryBackend;
use crate::cache::{CacheConfig, CacheStats, QueryCache};
use crate::config::{DemoArgs, Settings};
use crate::error::AppError;
use crate::query::{CachedQuery, FeedQuery, QueryContext, QueryDefaults, QueryUpdate};
use crate::ranking::ViewerContext;
use crate::realtime::SubscriptionManager;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const INDUSTRIES: [&str; 3] = ["fintech", "healthcare", "logistics"];

#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub name: &'static str,
    pub items: usize,
    pub has_more: bool,
    pub first_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSummary {
    pub id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub steps: Vec<DemoStep>,
    pub published_id: Uuid,
    pub published_on_top: bool,
    pub top_ranked: Vec<RankedSummary>,
    pub open_handles_after_unmount: usize,
    pub cache: CacheStats,
}

pub async fn run(settings: &Settings, args: &DemoArgs) -> Result<DemoReport, AppError> {
    if args.page_size == 0 {
        return Err(AppError::validation("page size must be greater than zero"));
    }

    let backend = MemoryBackend::new();
    let viewer = Uuid::new_v4();
    let connection = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    backend.seed(tables::FEED_POSTS, seed_posts(args.posts, connection, now)?);

    let cache = Arc::new(QueryCache::new(&CacheConfig::from(&settings.cache)));
    let realtime =
        SubscriptionManager::from_settings(Arc::new(backend.clone()), &settings.realtime);
    let ctx = QueryContext::new(
        Arc::clone(&cache),
        Arc::new(backend.clone()),
        realtime.clone(),
    )
    .with_defaults(QueryDefaults::from_settings(settings));

    let mut feed = ctx.query(FeedQuery::new(viewer).with_page_size(args.page_size));
    let mut steps = Vec::new();

    feed.mount();
    expect_fetch(feed.settle().await)?;
    steps.push(step("initial", &feed));

    if feed.load_more() {
        expect_fetch(feed.settle().await)?;
    }
    steps.push(step("load_more", &feed));

    if !timeout(STEP_TIMEOUT, feed.wait_until_live())
        .await
        .unwrap_or(false)
    {
        return Err(AppError::unexpected("feed subscription never opened"));
    }

    let published = ctx
        .mutations()
        .publish_post(
            Uuid::new_v4(),
            "We are hiring Rust engineers",
            Some(INDUSTRIES[0].to_string()),
        )
        .await?;

    let update = timeout(STEP_TIMEOUT, feed.next_update())
        .await
        .map_err(|_| AppError::unexpected("no realtime event after publishing"))?;
    if !matches!(update, Some(QueryUpdate::Invalidated(_))) {
        return Err(AppError::unexpected(format!(
            "expected an invalidation, got {update:?}"
        )));
    }
    expect_fetch(feed.settle().await)?;
    steps.push(step("after_insert", &feed));

    let published_on_top = feed.data().first().map(|post| post.id) == Some(published.id);
    let viewer_context = ViewerContext::new(viewer, OffsetDateTime::now_utc())
        .with_connections([connection])
        .with_industry(INDUSTRIES[0]);
    let top_ranked = feed
        .ranked(&viewer_context)
        .into_iter()
        .take(3)
        .map(|ranked| RankedSummary {
            id: ranked.item.id,
            score: ranked.score,
        })
        .collect();

    feed.unmount();
    let open_handles_after_unmount = realtime.open_handles();

    let report = DemoReport {
        steps,
        published_id: published.id,
        published_on_top,
        top_ranked,
        open_handles_after_unmount,
        cache: cache.stats(),
    };
    info!(
        published_on_top,
        open_handles = open_handles_after_unmount,
        hit_rate = report.cache.hit_rate(),
        "Demo scenario finished"
    );
    Ok(report)
}

fn seed_posts(
    count: usize,
    connection: Uuid,
    now: OffsetDateTime,
) -> Result<Vec<Value>, AppError> {
    (0..count)
        .map(|i| {
            let post = FeedPost {
                id: Uuid::new_v4(),
                author_id: if i % 4 == 0 { connection } else { Uuid::new_v4() },
                content: format!("Post #{i}"),
                industry: Some(INDUSTRIES[i % INDUSTRIES.len()].to_string()),
                likes_count: (i * 7 % 50) as u32,
                comments_count: (i * 3 % 20) as u32,
                reposts_count: (i % 5) as u32,
                created_at: now - time::Duration::minutes(i as i64 + 1),
            };
            serde_json::to_value(post).map_err(AppError::from)
        })
        .collect()
}

fn step(name: &'static str, feed: &CachedQuery<FeedQuery>) -> DemoStep {
    let step = DemoStep {
        name,
        items: feed.data().len(),
        has_more: feed.has_more(),
        first_id: feed.data().first().map(|post| post.id),
    };
    info!(
        step = name,
        items = step.items,
        has_more = step.has_more,
        "Demo step"
    );
    step
}

fn expect_fetch(update: Option<QueryUpdate>) -> Result<(), AppError> {
    match update {
        Some(QueryUpdate::Failed(err)) => Err(AppError::unexpected(err.message)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scenario_surfaces_published_post() {
        let report = run(&Settings::default(), &DemoArgs::default())
            .await
            .expect("demo");

        let items: Vec<usize> = report.steps.iter().map(|step| step.items).collect();
        assert_eq!(items, vec![10, 20, 20]);
        assert!(report.steps[0].has_more);
        assert!(report.published_on_top);
        assert_eq!(report.steps[2].first_id, Some(report.published_id));
        assert_eq!(report.open_handles_after_unmount, 0);
        assert_eq!(report.top_ranked.len(), 3);
    }

    #[tokio::test]
    async fn short_feed_reports_no_more_pages() {
        let args = DemoArgs {
            posts: 4,
            page_size: 10,
        };
        let report = run(&Settings::default(), &args).await.expect("demo");

        assert_eq!(report.steps[0].items, 4);
        assert!(!report.steps[0].has_more);
        assert_eq!(report.steps[2].items, 5);
    }
}
