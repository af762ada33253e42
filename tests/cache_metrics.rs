use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use talentgrid::backend::MemoryBackend;
use talentgrid::cache::{CacheConfig, CacheKey, EntityKind, QueryCache, TtlCache};
use talentgrid::clock::ManualClock;
use talentgrid::infra::telemetry;
use talentgrid::query::{FeedQuery, QueryContext};
use talentgrid::realtime::{ReconnectPolicy, SubscriptionManager};
use talentgrid::types::tables;
use time::macros::datetime;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn data_layer_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Cache hit/miss/evict/invalidate
    let config = CacheConfig {
        max_entries: 1,
        ..Default::default()
    };
    let cache: TtlCache<u32> = TtlCache::new(&config);
    let first = CacheKey::new(EntityKind::Profile, Uuid::new_v4());
    let second = CacheKey::new(EntityKind::Profile, Uuid::new_v4());
    assert!(cache.get(&first).is_none());
    cache.set(first.clone(), 1);
    assert_eq!(cache.get(&first), Some(1));
    cache.set(second, 2);
    assert_eq!(cache.invalidate_entity(EntityKind::Profile), 1);

    // Realtime gauge + reconnect, query fetch latency
    let backend = MemoryBackend::new();
    backend.seed(
        tables::FEED_POSTS,
        [json!({
            "id": Uuid::new_v4().to_string(),
            "author_id": Uuid::new_v4().to_string(),
            "content": "metrics",
            "created_at": "2025-06-01T12:00:00Z"
        })],
    );
    let policy = ReconnectPolicy {
        initial_ms: 5,
        max_ms: 20,
        multiplier: 2.0,
        jitter_ms: 0,
    };
    let realtime = SubscriptionManager::new(Arc::new(backend.clone()), policy);
    let ctx = QueryContext::new(
        Arc::new(QueryCache::new(&CacheConfig::default())),
        Arc::new(backend.clone()),
        realtime,
    );
    let mut feed = ctx.query(FeedQuery::new(Uuid::new_v4()));
    feed.mount();
    feed.settle().await;
    assert!(timeout(WAIT, feed.wait_until_live()).await.expect("live"));

    backend.drop_streams();
    timeout(WAIT, async {
        while backend.open_streams() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("stream reopened");
    feed.unmount();

    let names = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect::<HashSet<String>>();

    for expected in [
        "talentgrid_cache_hit_total",
        "talentgrid_cache_miss_total",
        "talentgrid_cache_evict_total",
        "talentgrid_cache_invalidated_total",
        "talentgrid_realtime_open_streams",
        "talentgrid_realtime_reconnect_total",
        "talentgrid_query_fetch_ms",
    ] {
        assert!(names.contains(expected), "missing metric {expected}");
    }
}

#[test]
fn expiry_counts_as_miss() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let cache: TtlCache<&str> = TtlCache::with_clock(&CacheConfig::default(), clock.clone());
        let key = CacheKey::new(EntityKind::Offers, Uuid::new_v4());

        cache.set_with_ttl(key.clone(), "offers", Duration::from_secs(60));
        assert_eq!(cache.get(&key), Some("offers"));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&key), Some("offers"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    });

    let counters: HashMap<String, u64> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .collect();

    assert_eq!(counters.get("talentgrid_cache_hit_total"), Some(&2));
    assert_eq!(counters.get("talentgrid_cache_miss_total"), Some(&1));
}
