use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warren_cache::{Cache, CacheConfig, CacheError, GetOrEnter};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_misses_run_one_producer() {
    let cache = Arc::new(Cache::new(CacheConfig::default()).unwrap());
    let produced = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let produced = produced.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute("k", &[], None, move || async move {
                    produced.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(b"v".to_vec())
                })
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), b"v");
    }
    assert_eq!(produced.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn leader_failure_releases_waiters_for_reelection() {
    let cache = Arc::new(Cache::new(CacheConfig::default()).unwrap());
    let attempts = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let attempts = attempts.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute("k", &[], None, move || async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    if attempt == 0 {
                        anyhow::bail!("first producer blows up");
                    }
                    Ok(b"v".to_vec())
                })
                .await
        }));
    }

    let mut failures = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(value) => assert_eq!(value, b"v"),
            Err(_) => failures += 1,
        }
    }
    // The producer error stayed with the failing leader; everyone else was
    // re-elected or served by the second, successful run.
    assert_eq!(failures, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[test]
fn sync_callers_coalesce_too() {
    let cache = Arc::new(Cache::new(CacheConfig::default()).unwrap());
    let produced = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let produced = produced.clone();
        handles.push(std::thread::spawn(move || {
            cache
                .get_or_compute_sync("k", &[], None, move || {
                    produced.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(40));
                    Ok(b"v".to_vec())
                })
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"v");
    }
    assert_eq!(produced.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiter_times_out_while_leader_stalls() {
    let cache = Arc::new(
        Cache::new(CacheConfig {
            flight_timeout: 1,
            ..CacheConfig::default()
        })
        .unwrap(),
    );

    // Take leadership by hand and never complete while the waiter waits.
    let permit = match cache.get_or_enter("k").unwrap() {
        GetOrEnter::Leader(permit) => permit,
        _ => panic!("cold key should elect a leader"),
    };

    let waiter_cache = cache.clone();
    let waiter = tokio::spawn(async move {
        waiter_cache
            .get_or_compute("k", &[], None, || async { Ok(b"never".to_vec()) })
            .await
    });

    let err = waiter.await.unwrap().unwrap_err();
    let cache_err = err
        .downcast_ref::<CacheError>()
        .expect("timeout should surface the cache error");
    assert!(matches!(cache_err, CacheError::LeaderTimeout(_)));
    assert_eq!(cache.stats().singleflight_timeouts, 1);

    // The stalled leader is unaffected and can still finish its flight.
    cache.set("k", b"late", &[], None).unwrap();
    permit.complete();
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"late"[..]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_waiter_leaves_the_leader_running() {
    let cache = Arc::new(Cache::new(CacheConfig::default()).unwrap());

    let leader_cache = cache.clone();
    let leader = tokio::spawn(async move {
        leader_cache
            .get_or_compute("k", &[], None, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(b"v".to_vec())
            })
            .await
            .unwrap()
    });

    // Give the leader time to take the flight, then cancel a waiter.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let waiter_cache = cache.clone();
    let waiter = tokio::spawn(async move {
        waiter_cache
            .get_or_compute("k", &[], None, || async { Ok(b"other".to_vec()) })
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();

    assert_eq!(leader.await.unwrap(), b"v");
    assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_observes_values_stored_while_it_was_electing() {
    let cache = Arc::new(Cache::new(CacheConfig::default()).unwrap());
    cache.set("k", b"already there", &[], None).unwrap();

    // A hit never enters a flight.
    match cache.get_or_enter("k").unwrap() {
        GetOrEnter::Hit(value) => assert_eq!(value, b"already there"),
        _ => panic!("expected a hit"),
    }
}
