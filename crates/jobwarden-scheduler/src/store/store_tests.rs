    use super::*;
    use crate::trigger::{CronSpec, Trigger};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, h, m, 0).unwrap()
    }

    fn hourly(id: &str) -> Job {
        Job::new(id, Trigger::interval_secs(3600).unwrap())
    }

    fn monthly(id: &str) -> Job {
        Job::new(id, Trigger::cron(CronSpec::new().day("1").hour("1")).unwrap())
            .with_coalesce(true)
            .with_misfire_grace_secs(Some(3_000_000))
    }

    async fn backends() -> Vec<(&'static str, Arc<dyn JobStore>)> {
        vec![
            ("memory", Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>),
            (
                "sqlite",
                Arc::new(SqliteJobStore::in_memory().await.unwrap()) as Arc<dyn JobStore>,
            ),
        ]
    }

    #[tokio::test]
    async fn test_register_is_insert_if_absent() {
        for (name, store) in backends().await {
            let job = hourly("get_tmdb_data");
            assert_eq!(store.register(&job).await.unwrap(), Registration::Inserted, "{name}");

            let changed = hourly("get_tmdb_data").with_name("renamed");
            assert_eq!(
                store.register(&changed).await.unwrap(),
                Registration::AlreadyExists,
                "{name}"
            );
            assert_eq!(store.get("get_tmdb_data").await.unwrap().name, "get_tmdb_data", "{name}");
        }
    }

    #[tokio::test]
    async fn test_get_round_trips_all_fields() {
        for (name, store) in backends().await {
            let mut job = monthly("update_imdb_db").with_next_run_time(at(1, 0));
            job.state = JobState::Scheduled;
            job.last_error = Some("boom".into());
            job.run_count = 3;
            job.failure_count = 1;
            store.register(&job).await.unwrap();

            assert_eq!(store.get("update_imdb_db").await.unwrap(), job, "{name}");
        }
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        for (name, store) in backends().await {
            assert!(store.get("nope").await.unwrap_err().is_not_found(), "{name}");
            assert!(
                store
                    .update_state("nope", JobState::Paused)
                    .await
                    .unwrap_err()
                    .is_not_found(),
                "{name}"
            );
            assert!(
                store
                    .compare_and_set_state("nope", JobState::Scheduled, JobState::Running)
                    .await
                    .unwrap_err()
                    .is_not_found(),
                "{name}"
            );
            assert!(store.set_next_run("nope", None).await.unwrap_err().is_not_found(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_state() {
        for (name, store) in backends().await {
            let mut job = hourly("a");
            job.state = JobState::Scheduled;
            store.register(&job).await.unwrap();

            assert!(
                store
                    .compare_and_set_state("a", JobState::Scheduled, JobState::Running)
                    .await
                    .unwrap(),
                "{name}"
            );
            // Second claim loses.
            assert!(
                !store
                    .compare_and_set_state("a", JobState::Scheduled, JobState::Running)
                    .await
                    .unwrap(),
                "{name}"
            );
            assert_eq!(store.get("a").await.unwrap().state, JobState::Running, "{name}");
        }
    }

    #[tokio::test]
    async fn test_update_state_and_next_run() {
        for (name, store) in backends().await {
            store.register(&hourly("a")).await.unwrap();
            store.update_state("a", JobState::Paused).await.unwrap();
            store.set_next_run("a", Some(at(5, 0))).await.unwrap();

            let job = store.get("a").await.unwrap();
            assert_eq!(job.state, JobState::Paused, "{name}");
            assert_eq!(job.next_run_time, Some(at(5, 0)), "{name}");

            store.set_next_run("a", None).await.unwrap();
            assert!(store.get("a").await.unwrap().next_run_time.is_none(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_record_run_bookkeeping() {
        for (name, store) in backends().await {
            store.register(&hourly("a")).await.unwrap();

            store
                .record_run("a", &RunRecord::failure(at(1, 0), at(1, 5), "exit status 1"))
                .await
                .unwrap();
            let job = store.get("a").await.unwrap();
            assert_eq!(job.run_count, 1, "{name}");
            assert_eq!(job.failure_count, 1, "{name}");
            assert_eq!(job.last_error.as_deref(), Some("exit status 1"), "{name}");

            store
                .record_run("a", &RunRecord::success(at(2, 0), at(2, 1)))
                .await
                .unwrap();
            let job = store.get("a").await.unwrap();
            assert_eq!(job.run_count, 2, "{name}");
            assert_eq!(job.failure_count, 1, "{name}");
            assert!(job.last_error.is_none(), "{name}");
            assert_eq!(job.last_fire_time, Some(at(2, 0)), "{name}");
            assert_eq!(job.last_finished_at, Some(at(2, 1)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_replace_definition_keeps_state() {
        for (name, store) in backends().await {
            let mut job = hourly("a").with_next_run_time(at(3, 0));
            job.state = JobState::Paused;
            store.register(&job).await.unwrap();

            let updated = monthly("a").with_name("Monthly A");
            store.replace_definition(&updated).await.unwrap();

            let stored = store.get("a").await.unwrap();
            assert!(stored.same_definition(&updated), "{name}");
            assert_eq!(stored.state, JobState::Paused, "{name}");
            assert_eq!(stored.next_run_time, Some(at(3, 0)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_list_orders_by_next_run() {
        for (name, store) in backends().await {
            store.register(&hourly("pending")).await.unwrap();
            store.register(&hourly("late").with_next_run_time(at(9, 0))).await.unwrap();
            store.register(&hourly("early").with_next_run_time(at(1, 0))).await.unwrap();

            let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
            assert_eq!(ids, vec!["early", "late", "pending"], "{name}");
        }
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("jobs.sqlite");

        {
            let store = SqliteJobStore::open(&path).await.unwrap();
            store.register(&monthly("update_imdb_db")).await.unwrap();
            store.update_state("update_imdb_db", JobState::Paused).await.unwrap();
        }

        let store = SqliteJobStore::open(&path).await.unwrap();
        let job = store.get("update_imdb_db").await.unwrap();
        assert_eq!(job.state, JobState::Paused);
        assert_eq!(job.misfire_grace_secs, Some(3_000_000));
    }

    #[tokio::test]
    async fn test_open_store_uris() {
        let dir = TempDir::new().unwrap();

        let store = open_store("memory://").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let store = open_store("sqlite::memory:").await.unwrap();
        store.register(&hourly("a")).await.unwrap();

        let uri = format!("sqlite://{}", dir.path().join("a.sqlite").display());
        open_store(&uri).await.unwrap();

        let bare = dir.path().join("b.sqlite");
        open_store(bare.to_str().unwrap()).await.unwrap();
        assert!(bare.exists());

        assert!(matches!(
            open_store("postgres://localhost/jobs").await,
            Err(StoreError::InvalidUri(_))
        ));
        assert!(matches!(open_store("  ").await, Err(StoreError::InvalidUri(_))));
    }
