//! End-to-end tests for the scheduler: bootstrap, dispatcher, event bus and
//! dependency coordinator working together against a real store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use jobwarden_scheduler::{
    body_fn, listener_fn, Bootstrap, CronSpec, DependencyRule, Dispatcher, EventBus, Job,
    JobBody, JobEvent, JobEventKind, JobRegistry, JobSpec, JobState, JobStore, ManualClock,
    MemoryJobStore, SqliteJobStore, Trigger,
};

// ============================================================================
// Test Helpers
// ============================================================================

const PRIMARY: &str = "update_imdb_db";
const DEPENDENTS: [&str; 2] = ["get_tmdb_data", "get_omdb_data"];

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap()
}

fn specs() -> Vec<JobSpec> {
    let monthly = Trigger::cron(CronSpec::new().day("1").hour("1")).unwrap();
    let hourly = Trigger::interval_secs(3600).unwrap();
    vec![
        JobSpec::new(
            Job::new(PRIMARY, monthly)
                .with_coalesce(true)
                .with_misfire_grace_secs(Some(3_000_000)),
        )
        .replace_existing(true),
        JobSpec::new(dependent(DEPENDENTS[0], hourly.clone())),
        JobSpec::new(dependent(DEPENDENTS[1], hourly)),
    ]
}

fn dependent(id: &str, trigger: Trigger) -> Job {
    Job::new(id, trigger)
        .with_coalesce(true)
        .with_misfire_grace_secs(Some(3_000_000))
}

fn rule() -> DependencyRule {
    DependencyRule::new(PRIMARY, DEPENDENTS)
}

fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn JobBody> {
    let counter = counter.clone();
    body_fn(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Signals `entered`, then blocks until `gate` receives a permit.
fn gated(entered: &Arc<Notify>, gate: &Arc<Semaphore>) -> Arc<dyn JobBody> {
    let entered = entered.clone();
    let gate = gate.clone();
    body_fn(move |_| {
        let entered = entered.clone();
        let gate = gate.clone();
        async move {
            entered.notify_one();
            gate.acquire().await.unwrap().forget();
            Ok(())
        }
    })
}

async fn set_scheduled(store: &dyn JobStore, id: &str, at: DateTime<Utc>) {
    store.set_next_run(id, Some(at)).await.unwrap();
    store.update_state(id, JobState::Scheduled).await.unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bootstrap_twice_against_same_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.sqlite");

    {
        let store = Arc::new(SqliteJobStore::open(&path).await.unwrap());
        let report = Bootstrap::new(store.clone(), Arc::new(EventBus::new()), specs())
            .with_dependency(rule())
            .run()
            .await
            .unwrap();
        assert_eq!(report.inserted.len(), 3);
    }

    // Simulated restart.
    let store = Arc::new(SqliteJobStore::open(&path).await.unwrap());
    let report = Bootstrap::new(store.clone(), Arc::new(EventBus::new()), specs())
        .with_dependency(rule())
        .run()
        .await
        .unwrap();
    assert!(report.prior_run_detected());
    assert_eq!(store.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_primary_run_pauses_and_resumes_dependents() {
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::new());
    let clock = Arc::new(ManualClock::new(now()));
    Bootstrap::new(store.clone(), bus.clone(), specs())
        .with_dependency(rule())
        .with_clock(clock.clone())
        .run()
        .await
        .unwrap();

    set_scheduled(store.as_ref(), PRIMARY, now()).await;
    for id in DEPENDENTS {
        set_scheduled(store.as_ref(), id, now() + Duration::minutes(30)).await;
    }

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let dependent_runs = Arc::new(AtomicUsize::new(0));
    let registry = JobRegistry::new()
        .with(PRIMARY, gated(&entered, &gate))
        .with(DEPENDENTS[0], counting(&dependent_runs))
        .with(DEPENDENTS[1], counting(&dependent_runs));
    let dispatcher = Dispatcher::new(store.clone(), registry, bus.clone()).with_clock(clock.clone());

    assert_eq!(dispatcher.tick().await.unwrap().started, vec![PRIMARY]);
    entered.notified().await;

    // Started has been published before the body ran.
    for id in DEPENDENTS {
        assert_eq!(store.get(id).await.unwrap().state, JobState::Paused);
    }

    // Dependents come due while the primary is still running: nothing starts.
    clock.advance(Duration::hours(1));
    assert!(dispatcher.tick().await.unwrap().started.is_empty());
    assert_eq!(dependent_runs.load(Ordering::SeqCst), 0);

    gate.add_permits(1);
    dispatcher.wait_idle().await;
    for id in DEPENDENTS {
        assert_eq!(store.get(id).await.unwrap().state, JobState::Scheduled);
    }

    // Resumed dependents are evaluated again, including their overdue runs.
    let report = dispatcher.tick().await.unwrap();
    dispatcher.wait_idle().await;
    assert_eq!(report.started.len(), 2);
    assert_eq!(dependent_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_dependent_does_not_break_primary() {
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::new());
    let clock = Arc::new(ManualClock::new(now()));

    // Only the primary and one dependent are configured.
    let partial: Vec<JobSpec> = specs().into_iter().take(2).collect();
    Bootstrap::new(store.clone(), bus.clone(), partial)
        .with_dependency(rule())
        .with_clock(clock.clone())
        .run()
        .await
        .unwrap();
    set_scheduled(store.as_ref(), PRIMARY, now()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        store.clone(),
        JobRegistry::new().with(PRIMARY, counting(&runs)),
        bus.clone(),
    )
    .with_clock(clock);

    dispatcher.tick().await.unwrap();
    dispatcher.wait_idle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let primary = store.get(PRIMARY).await.unwrap();
    assert_eq!(primary.state, JobState::Scheduled);
    assert_eq!(primary.failure_count, 0);
    assert_eq!(
        store.get(DEPENDENTS[0]).await.unwrap().state,
        JobState::Scheduled
    );
}

#[tokio::test]
async fn test_misfire_beyond_grace_is_not_executed() {
    let store = Arc::new(MemoryJobStore::new());
    let daily = Trigger::cron(CronSpec::new().hour("1")).unwrap();
    let mut job = Job::new("nightly", daily).with_misfire_grace_secs(Some(0));
    job.state = JobState::Scheduled;
    job.next_run_time = Some(now() - Duration::hours(1));
    store.register(&job).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::<JobEvent>::new()));
    let bus = Arc::new(EventBus::new());
    {
        let events = events.clone();
        bus.subscribe(
            JobEventKind::Started,
            listener_fn(move |event| {
                let events = events.clone();
                async move {
                    events.lock().push(event);
                    Ok(())
                }
            }),
        );
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        store.clone(),
        JobRegistry::new().with("nightly", counting(&runs)),
        bus,
    )
    .with_clock(Arc::new(ManualClock::new(now())));

    dispatcher.tick().await.unwrap();
    dispatcher.wait_idle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(events.lock().is_empty());
    assert_eq!(
        store.get("nightly").await.unwrap().next_run_time,
        Some(Utc.with_ymd_and_hms(2026, 3, 16, 1, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_concurrent_scans_execute_once() {
    let store = Arc::new(MemoryJobStore::new());
    let mut job = Job::new("a", Trigger::interval_secs(3600).unwrap());
    job.state = JobState::Scheduled;
    job.next_run_time = Some(now());
    store.register(&job).await.unwrap();

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let dispatcher = Dispatcher::new(
        store.clone(),
        JobRegistry::new().with("a", gated(&entered, &gate)),
        Arc::new(EventBus::new()),
    )
    .with_clock(Arc::new(ManualClock::new(now())));

    let (first, second) = tokio::join!(dispatcher.tick(), dispatcher.tick());
    let started = first.unwrap().started.len() + second.unwrap().started.len();
    assert_eq!(started, 1);

    entered.notified().await;
    assert!(dispatcher.tick().await.unwrap().started.is_empty());

    gate.add_permits(1);
    dispatcher.wait_idle().await;
    assert_eq!(store.get("a").await.unwrap().run_count, 1);
}

#[tokio::test]
async fn test_coalesce_runs_backlog_once() {
    let store = Arc::new(MemoryJobStore::new());
    let mut job = Job::new("a", Trigger::interval_secs(3600).unwrap())
        .with_coalesce(true)
        .with_misfire_grace_secs(None);
    job.state = JobState::Scheduled;
    // Five missed firings, from -4h59m to -59m.
    job.next_run_time = Some(now() - Duration::hours(5) + Duration::minutes(1));
    store.register(&job).await.unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        store.clone(),
        JobRegistry::new().with("a", counting(&runs)),
        Arc::new(EventBus::new()),
    )
    .with_clock(Arc::new(ManualClock::new(now())));

    for _ in 0..3 {
        dispatcher.tick().await.unwrap();
        dispatcher.wait_idle().await;
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let job = store.get("a").await.unwrap();
    assert!(job.next_run_time.unwrap() > now());
}

#[tokio::test]
async fn test_stale_data_runs_primary_on_first_tick() {
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::new());
    let clock = Arc::new(ManualClock::new(now()));

    let report = Bootstrap::new(store.clone(), bus.clone(), specs())
        .with_dependency(rule())
        .with_freshness(jobwarden_scheduler::freshness_fn(|| async { Ok(false) }))
        .with_clock(clock.clone())
        .run()
        .await
        .unwrap();
    assert!(report.forced_primary);

    let runs = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        store.clone(),
        JobRegistry::new().with(PRIMARY, counting(&runs)),
        bus,
    )
    .with_clock(clock);

    let tick = dispatcher.tick().await.unwrap();
    dispatcher.wait_idle().await;
    assert!(tick.started.contains(&PRIMARY.to_string()));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Back on the calendar afterwards.
    assert_eq!(
        store.get(PRIMARY).await.unwrap().next_run_time,
        Some(Utc.with_ymd_and_hms(2026, 4, 1, 1, 0, 0).unwrap())
    );
}
