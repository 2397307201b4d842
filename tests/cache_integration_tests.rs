use std::sync::Arc;
use std::time::Duration;

use warren_cache::{Cache, CacheConfig, CacheError, DiskStorage, Storage};

fn cache() -> Cache {
    init_tracing();
    Cache::new(CacheConfig::default()).unwrap()
}

// Route cache tracing through the test harness; `RUST_LOG`-style filtering
// is left to the default subscriber settings.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

#[test]
fn basic_hit_miss_invalidate() {
    let cache = cache();
    cache.set("k", b"v", &["org:1"], None).unwrap();
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"v"[..]));

    cache.invalidate("org:1").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn hierarchical_invalidation() {
    let cache = cache();

    // A prefix invalidation takes out descendants.
    cache.set("k", b"v", &["org:1:user:42"], None).unwrap();
    cache.invalidate("org:1").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);

    // A sibling invalidation does not.
    cache.set("k2", b"w", &["org:1:user:43"], None).unwrap();
    cache.invalidate("org:1:user:42").unwrap();
    assert_eq!(cache.get("k2").unwrap().as_deref(), Some(&b"w"[..]));
}

#[test]
fn invalidating_a_descendant_stales_the_coarser_dependency() {
    let cache = cache();
    cache.set("org_report", b"totals", &["org:1"], None).unwrap();
    cache.invalidate("org:1:user:42").unwrap();
    assert_eq!(cache.get("org_report").unwrap(), None);
}

#[test]
fn deep_hierarchy_validation() {
    let cache = cache();
    let tag = (0..15).map(|i| format!("l{i}")).collect::<Vec<_>>().join(":");
    cache.set("k", b"v", &[tag.as_str()], None).unwrap();
    assert!(cache.get("k").unwrap().is_some());

    cache.invalidate("l0").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn sibling_noise_never_stales() {
    let cache = cache();
    cache.set("k", b"v", &["org:1:user:43"], None).unwrap();
    for i in 0..40 {
        cache.invalidate(&format!("org:1:user:{i}")).unwrap();
        assert!(
            cache.get("k").unwrap().is_some(),
            "sibling invalidation {i} must not stale the entry"
        );
    }
    // The entry's own tag still works after all that noise.
    cache.invalidate("org:1:user:43").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn multiple_tags_any_one_stales() {
    let cache = cache();
    cache
        .set("k", b"v", &["user:42", "feature:search"], None)
        .unwrap();
    assert!(cache.get("k").unwrap().is_some());
    cache.invalidate("feature:search").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn ttl_expires_entries() {
    let cache = Cache::new(CacheConfig {
        read_extend_ttl: false,
        ..CacheConfig::default()
    })
    .unwrap();
    cache
        .set("k", b"v", &[], Some(Duration::from_millis(80)))
        .unwrap();
    assert!(cache.get("k").unwrap().is_some());
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn reads_extend_idle_entries() {
    let cache = Cache::new(CacheConfig {
        tti_flush_secs: 0,
        ..CacheConfig::default()
    })
    .unwrap();
    cache
        .set("k", b"v", &[], Some(Duration::from_millis(200)))
        .unwrap();

    // Keep reading past the original deadline; each read pushes it out.
    for _ in 0..4 {
        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get("k").unwrap().is_some(), "reads should extend ttl");
    }
    // Total elapsed is well past the original 200ms window.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(cache.get("k").unwrap(), None, "idle entry must expire");
}

#[test]
fn capacity_bound_holds_throughout() {
    let cache = Cache::new(CacheConfig {
        max_entries: Some(10),
        ..CacheConfig::default()
    })
    .unwrap();
    for i in 0..100 {
        cache
            .set(&format!("key-{i}"), &[i as u8], &[], None)
            .unwrap();
        assert!(cache.len() <= 10, "bound violated at insert {i}");
    }
    assert_eq!(cache.len(), 10);
}

#[test]
fn clear_is_idempotent() {
    let cache = cache();
    cache.set("k", b"v", &["t"], None).unwrap();
    cache.clear().unwrap();
    let after_one = cache.len();
    cache.clear().unwrap();
    assert_eq!(cache.len(), after_one);
    assert_eq!(cache.get("k").unwrap(), None);

    // The trie history is gone too: a fresh entry under the old tag is
    // unaffected by pre-clear invalidations.
    cache.invalidate("t").unwrap();
    cache.clear().unwrap();
    cache.set("k", b"v2", &["t"], None).unwrap();
    assert!(cache.get("k").unwrap().is_some());
}

#[test]
fn oversized_values_fail_without_side_effects() {
    let cache = Cache::new(CacheConfig {
        max_value_bytes: Some(16),
        ..CacheConfig::default()
    })
    .unwrap();
    let err = cache.set("k", &[0u8; 1024], &["t"], None).unwrap_err();
    assert!(matches!(err, CacheError::StorageIsFull));
    assert_eq!(cache.get("k").unwrap(), None);
    assert!(cache.is_empty());
}

#[test]
fn unknown_backend_scheme_is_a_construction_error() {
    assert!(Cache::new(CacheConfig {
        storage_url: Some("redis://localhost:6379".into()),
        ..CacheConfig::default()
    })
    .is_err());
    assert!(Cache::new(CacheConfig {
        bus_url: Some("amqp://localhost".into()),
        ..CacheConfig::default()
    })
    .is_err());
}

#[test]
fn entries_survive_restart_on_disk_storage() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let config = CacheConfig {
        storage_url: Some(url),
        ..CacheConfig::default()
    };

    {
        let cache = Cache::new(config.clone()).unwrap();
        cache.set("k", b"persisted", &["org:1"], None).unwrap();
    }

    // A new instance over the same directory starts with a fresh trie;
    // the stored witnesses still validate.
    let cache = Cache::new(config).unwrap();
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"persisted"[..]));

    // Invalidation after restart still applies.
    cache.invalidate("org:1").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn restart_then_invalidate_before_first_read() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().display());
    let config = CacheConfig {
        storage_url: Some(url),
        ..CacheConfig::default()
    };

    {
        let cache = Cache::new(config.clone()).unwrap();
        // Build up invalidation history before the write, so the stored
        // witness carries non-zero clock values into the restart.
        for _ in 0..3 {
            cache.invalidate("org:1").unwrap();
        }
        cache.set("k", b"v", &["org:1"], None).unwrap();
        assert!(cache.get("k").unwrap().is_some());
    }

    let cache = Cache::new(config).unwrap();
    cache.invalidate("org:1").unwrap();
    assert_eq!(
        cache.get("k").unwrap(),
        None,
        "an invalidation issued after restart must stale surviving entries"
    );
}

#[test]
fn shared_storage_backend_between_instances() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(DiskStorage::open(dir.path(), None).unwrap());

    let writer = Cache::with_parts(CacheConfig::default(), storage.clone(), None);
    writer.set("k", b"shared", &[], None).unwrap();

    let reader = Cache::with_parts(CacheConfig::default(), storage, None);
    assert_eq!(reader.get("k").unwrap().as_deref(), Some(&b"shared"[..]));
}

#[test]
fn stats_expose_counter_totals() {
    let cache = cache();
    cache.set("k", b"v", &["t"], None).unwrap();
    cache.get("k").unwrap();
    cache.get("k").unwrap();
    cache.get("gone").unwrap();
    cache.invalidate("t").unwrap();
    cache.get("k").unwrap();

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.invalidations, 1);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["cache_hits_total"], 2);
}
