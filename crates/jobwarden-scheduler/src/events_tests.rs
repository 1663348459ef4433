    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn JobListener> {
        let log = log.clone();
        listener_fn(move |event: JobEvent| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{}:{}:{}", tag, event.kind, event.job_id));
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_listeners_receive_their_kind_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(JobEventKind::Started, recorder(&log, "first"));
        bus.subscribe(JobEventKind::Finished, recorder(&log, "fin"));
        bus.subscribe(JobEventKind::Started, recorder(&log, "second"));

        let now = Utc::now();
        bus.publish(&JobEvent::started("update_imdb_db", now, now)).await;
        bus.publish(&JobEvent::finished("update_imdb_db", now, now, RunOutcome::Ok))
            .await;

        assert_eq!(
            *log.lock(),
            vec![
                "first:started:update_imdb_db",
                "second:started:update_imdb_db",
                "fin:finished:update_imdb_db",
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            JobEventKind::Started,
            listener_fn(|_| async { Err(ListenerError::Failed("nope".into())) }),
        );
        bus.subscribe(JobEventKind::Started, recorder(&log, "after"));

        let now = Utc::now();
        let failures = bus.publish(&JobEvent::started("a", now, now)).await;
        assert_eq!(failures, 1);
        assert_eq!(log.lock().len(), 1);
    }

    struct PanickingListener;

    #[async_trait]
    impl JobListener for PanickingListener {
        async fn on_event(&self, _event: &JobEvent) -> Result<(), ListenerError> {
            panic!("listener exploded");
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_is_contained() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(JobEventKind::Finished, Arc::new(PanickingListener));
        bus.subscribe(JobEventKind::Finished, recorder(&log, "after"));

        let now = Utc::now();
        let failures = bus
            .publish(&JobEvent::finished(
                "a",
                now,
                now,
                RunOutcome::Failed("x".into()),
            ))
            .await;
        assert_eq!(failures, 1);
        assert_eq!(*log.lock(), vec!["after:finished:a"]);
    }

    #[tokio::test]
    async fn test_publish_without_listeners() {
        let bus = EventBus::new();
        let now = Utc::now();
        assert_eq!(bus.publish(&JobEvent::started("a", now, now)).await, 0);
        assert_eq!(bus.listener_count(JobEventKind::Started), 0);
    }

    #[test]
    fn test_event_constructors() {
        let now = Utc::now();
        let started = JobEvent::started("a", now, now);
        assert_eq!(started.kind, JobEventKind::Started);
        assert!(started.outcome.is_none());

        let finished = JobEvent::finished("a", now, now, RunOutcome::Failed("x".into()));
        assert_eq!(finished.kind, JobEventKind::Finished);
        assert!(!finished.outcome.unwrap().is_ok());
    }
