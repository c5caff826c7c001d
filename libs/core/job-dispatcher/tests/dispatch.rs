mod common;

use common::MemoryStore;
use job_dispatcher::{
    handler_fn, CallbackQueueSink, Dispatcher, DispatcherConfig, ExecutionOutcome,
    IterationReport, JobSource, QueueAdmin, QueueIdentity, QueueStore, RejectReason,
    StatusRecord, Submitter, WorkStatus,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config(group: &str, name: &str) -> DispatcherConfig {
    DispatcherConfig::new(group, name).with_pop_timeout(Duration::from_millis(20))
}

#[tokio::test]
async fn test_submitted_job_runs_once_and_counter_nets_to_zero() {
    let store = Arc::new(MemoryStore::new());
    let config = config("mail", "outbound");

    Submitter::new(store.clone(), &config)
        .submit("send_email", &json!({"to": "a@b.com"}))
        .await
        .unwrap();
    assert_eq!(store.counter("mail/workerCountMap", "mail/outbound").await, 1);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let dispatcher = Dispatcher::new(store.clone(), config);
    dispatcher.register(
        "send_email",
        handler_fn(move |args| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(args);
                Ok(())
            }
        }),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert!(matches!(
        report,
        IterationReport::Executed { outcome: ExecutionOutcome::Success, .. }
    ));

    let report = dispatcher.run_once().await.unwrap();
    assert!(report.is_idle());

    assert_eq!(*calls.lock().unwrap(), vec![r#"{"to":"a@b.com"}"#.to_string()]);
    assert_eq!(store.counter("mail/workerCountMap", "mail/outbound").await, 0);
    assert!(store.list("mail/outbound").await.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_requeued() {
    let store = Arc::new(MemoryStore::new());
    let config = config("mail", "outbound");

    Submitter::new(store.clone(), &config)
        .submit("unknown", &json!({}))
        .await
        .unwrap();

    let called = Arc::new(AtomicUsize::new(0));
    let seen = called.clone();
    let dispatcher = Dispatcher::new(store.clone(), config);
    dispatcher.register(
        "send_email",
        handler_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }),
    );

    let report = dispatcher.run_once().await.unwrap();

    assert!(matches!(
        report,
        IterationReport::Rejected { reason: RejectReason::Unregistered(ref name), .. } if name == "unknown"
    ));
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert!(store.list("mail/outbound").await.is_empty());
    assert!(store.list("mail/outbound_crashed_job").await.is_empty());
    assert_eq!(store.counter("mail/workerCountMap", "mail/outbound").await, 0);
}

#[tokio::test]
async fn test_idle_worker_steals_from_busiest_sibling() {
    let store = Arc::new(MemoryStore::new());

    let queue_a = Submitter::for_queue(store.clone(), QueueIdentity::new("g", "a"));
    for i in 0..5 {
        queue_a.submit("ping", &json!({"n": i})).await.unwrap();
    }
    let queue_b = Submitter::for_queue(store.clone(), QueueIdentity::new("g", "b"));
    for i in 0..2 {
        queue_b.submit("ping", &json!({"n": i})).await.unwrap();
    }
    store.set_counter("g/workerCountMap", "g/c", 0).await;

    let dispatcher = Dispatcher::new(store.clone(), config("g", "c"));
    dispatcher.register("ping", handler_fn(|_| async { Ok(()) }));

    let report = dispatcher.run_once().await.unwrap();

    assert!(matches!(
        report,
        IterationReport::Executed { source: JobSource::Sibling, .. }
    ));
    assert_eq!(report.source_key(), Some("g/a"));
    assert_eq!(store.list("g/a").await.len(), 4);
    assert_eq!(store.list("g/b").await.len(), 2);
    assert_eq!(store.counter("g/workerCountMap", "g/a").await, 4);
    assert_eq!(store.counter("g/workerCountMap", "g/c").await, 0);
}

#[tokio::test]
async fn test_ungrouped_worker_never_steals() {
    let store = Arc::new(MemoryStore::new());
    let sibling = QueueIdentity::new(job_dispatcher::DEFAULT_GROUP, "other");
    Submitter::for_queue(store.clone(), sibling.clone())
        .submit("ping", &json!({}))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(
        store.clone(),
        DispatcherConfig::default().with_pop_timeout(Duration::from_millis(20)),
    );
    dispatcher.register("ping", handler_fn(|_| async { Ok(()) }));

    let report = dispatcher.run_once().await.unwrap();

    assert!(report.is_idle());
    assert_eq!(store.list(&sibling.key()).await.len(), 1);
    assert_eq!(store.counter(&sibling.counter_key(), &sibling.key()).await, 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_worker() {
    let store = Arc::new(MemoryStore::new());
    let config = config("mail", "outbound");
    let submitter = Submitter::new(store.clone(), &config);
    submitter.submit("explode", &json!(null)).await.unwrap();
    submitter.submit("ping", &json!(null)).await.unwrap();

    let dispatcher = Dispatcher::new(store.clone(), config);
    dispatcher.register(
        "explode",
        handler_fn(|args| async move {
            if args.is_empty() {
                panic!("handler blew up");
            }
            Ok(())
        }),
    );
    dispatcher.register("ping", handler_fn(|_| async { Ok(()) }));

    let first = dispatcher.run_once().await.unwrap();
    let second = dispatcher.run_once().await.unwrap();

    assert!(matches!(
        first,
        IterationReport::Executed { outcome: ExecutionOutcome::Panicked(_), .. }
    ));
    assert!(matches!(
        second,
        IterationReport::Executed { outcome: ExecutionOutcome::Success, .. }
    ));
    assert_eq!(dispatcher.gate().in_flight(), 0);
    assert_eq!(store.counter("mail/workerCountMap", "mail/outbound").await, 0);
}

#[tokio::test]
async fn test_callback_queue_records_status() {
    let store = Arc::new(MemoryStore::new());
    let config = config("mail", "outbound");
    let submitter = Submitter::new(store.clone(), &config);
    submitter.submit("ok", &json!({})).await.unwrap();
    submitter.submit("fail", &json!({})).await.unwrap();

    let sink = Arc::new(CallbackQueueSink::new(store.clone(), &config.queue()));
    let dispatcher = Dispatcher::new(store.clone(), config).with_status_sink(sink);
    dispatcher.register("ok", handler_fn(|_| async { Ok(()) }));
    dispatcher.register(
        "fail",
        handler_fn(|_| async { Err(eyre::eyre!("downstream unavailable")) }),
    );

    dispatcher.run_once().await.unwrap();
    dispatcher.run_once().await.unwrap();

    let records: Vec<StatusRecord> = store
        .list("mail/outbound_job_callback")
        .await
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect();

    // Newest first
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "fail");
    assert_eq!(records[0].status, WorkStatus::Failure);
    assert_eq!(records[0].info, "downstream unavailable");
    assert_eq!(records[1].name, "ok");
    assert_eq!(records[1].status, WorkStatus::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_never_exceeds_concurrency() {
    let store = Arc::new(MemoryStore::new());
    let config = config("batch", "resize").with_concurrency(2);
    let submitter = Submitter::new(store.clone(), &config);
    for i in 0..6 {
        submitter.submit("resize", &json!({"image": i})).await.unwrap();
    }

    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let (r, m, d) = (running.clone(), max_running.clone(), done.clone());

    let dispatcher = Dispatcher::new(store.clone(), config);
    dispatcher.register(
        "resize",
        handler_fn(move |_| {
            let (r, m, d) = (r.clone(), m.clone(), d.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    let gate = dispatcher.gate();

    let _ = tokio::time::timeout(Duration::from_millis(1500), dispatcher.run()).await;

    assert_eq!(done.load(Ordering::SeqCst), 6);
    assert!(max_running.load(Ordering::SeqCst) <= 2);
    assert!(gate.peak() <= 2);
    assert_eq!(store.counter("batch/workerCountMap", "batch/resize").await, 0);
}

#[tokio::test]
async fn test_admin_removes_matching_jobs_across_group() {
    let store = Arc::new(MemoryStore::new());
    let outbound = Submitter::for_queue(store.clone(), QueueIdentity::new("mail", "outbound"));
    let bulk = Submitter::for_queue(store.clone(), QueueIdentity::new("mail", "bulk"));

    outbound.submit("send_email", &json!({"to": "a@b.com"})).await.unwrap();
    outbound.submit("send_email", &json!({"to": "c@d.com"})).await.unwrap();
    bulk.submit("send_email", &json!({"to": "a@b.com"})).await.unwrap();
    bulk.submit("send_sms", &json!({"to": "a@b.com"})).await.unwrap();

    let admin = QueueAdmin::new(store.clone(), QueueIdentity::new("mail", "outbound"));
    let removed = admin.remove("send_email", "to", "a@b.com").await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.list("mail/outbound").await.len(), 1);
    assert_eq!(store.list("mail/bulk").await.len(), 1);
    assert!(store.list("mail/bulk").await[0].contains("send_sms"));

    let counters = admin.counters().await.unwrap();
    assert_eq!(counters["mail/outbound"], 2);
    assert_eq!(counters["mail/bulk"], 2);
}

#[tokio::test]
async fn test_admin_remove_skips_keys_that_are_not_lists() {
    let store = Arc::new(MemoryStore::new());
    store.set_string("mail_session", "token-123").await;

    let outbound = Submitter::for_queue(store.clone(), QueueIdentity::new("mail", "outbound"));
    outbound.submit("send_email", &json!({"to": "a@b.com"})).await.unwrap();
    outbound.submit("send_email", &json!({"to": "c@d.com"})).await.unwrap();

    let admin = QueueAdmin::new(store.clone(), QueueIdentity::new("mail", "outbound"));
    let removed = admin.remove("send_email", "to", "a@b.com").await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.list("mail/outbound").await.len(), 1);
    assert_eq!(store.counter("mail/workerCountMap", "mail/outbound").await, 2);
}

#[tokio::test]
async fn test_crash_queue_is_only_observed() {
    let store = Arc::new(MemoryStore::new());
    store
        .push("mail/outbound_crashed_job", r#"{"name":"old"}"#)
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), config("mail", "outbound"));
    let report = dispatcher.run_once().await.unwrap();

    assert!(report.is_idle());
    assert_eq!(store.list("mail/outbound_crashed_job").await.len(), 1);
}
