//! Concurrency properties of numbering and dispatch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tempfile::TempDir;

use queuedesk_core::{
    numbering::queue_date_for,
    store::{IssueTicket, NewCategory, NewCounter},
    CallOutcome, Config, DispatchEngine, EventHub, IssueRequest, NumberingService, QueueStore,
    RetryPolicy, SqliteQueueStore,
};

async fn category(store: &dyn QueueStore, prefix: &str) -> i64 {
    store
        .create_category(
            NewCategory {
                name: format!("Category {}", prefix),
                prefix: prefix.to_string(),
                priority: 1,
                is_active: true,
            },
            Utc::now(),
        )
        .await
        .expect("Failed to create category")
        .id
}

fn engine(store: Arc<dyn QueueStore>) -> Arc<DispatchEngine> {
    Arc::new(DispatchEngine::from_config(
        store,
        EventHub::new(1024),
        &Config::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issue_yields_contiguous_sequences() {
    let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
    let general = category(store.as_ref(), "A").await;
    let engine = engine(store);

    const N: u32 = 50;
    let handles: Vec<_> = (0..N)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .issue_ticket(IssueRequest {
                        category_id: general,
                        ..Default::default()
                    })
                    .await
                    .unwrap()
                    .applied()
                    .unwrap()
            })
        })
        .collect();

    let mut sequences: Vec<u32> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().daily_sequence)
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=N).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_call_next_never_double_assigns() {
    let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
    let general = category(store.as_ref(), "A").await;
    let billing = category(store.as_ref(), "B").await;
    let engine = engine(Arc::clone(&store));

    // Overlapping category sets.
    let mut counters = Vec::new();
    for (number, categories) in [
        ("1", vec![general]),
        ("2", vec![general, billing]),
        ("3", vec![billing]),
        ("4", vec![general, billing]),
    ] {
        let counter = store
            .create_counter(
                NewCounter {
                    number: number.to_string(),
                    name: None,
                    category_ids: categories,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        engine.open_counter(counter.id, None).await.unwrap();
        counters.push(counter.id);
    }

    let mut issued = HashSet::new();
    for i in 0..40 {
        let category_id = if i % 2 == 0 { general } else { billing };
        let ticket = engine
            .issue_ticket(IssueRequest {
                category_id,
                ..Default::default()
            })
            .await
            .unwrap()
            .applied()
            .unwrap();
        issued.insert(ticket.id);
    }

    let workers: Vec<_> = counters
        .iter()
        .map(|&counter_id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut served = Vec::new();
                loop {
                    match engine.call_next(counter_id).await.unwrap() {
                        CallOutcome::Called { ticket, .. } => {
                            served.push(ticket.id);
                            engine.complete_ticket(counter_id).await.unwrap();
                        }
                        CallOutcome::QueueEmpty { .. } => break,
                        CallOutcome::Busy(rejection) => panic!("unexpected {}", rejection),
                    }
                }
                served
            })
        })
        .collect();

    let served: Vec<i64> = join_all(workers)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    let unique: HashSet<i64> = served.iter().copied().collect();
    assert_eq!(unique.len(), served.len(), "a ticket was served twice");
    assert_eq!(unique, issued, "a ticket was skipped");
    assert!(store.serving_tickets().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_connections_share_one_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queue.db");

    let first = Arc::new(SqliteQueueStore::open(&path, Duration::from_secs(5)).unwrap());
    let general = category(first.as_ref(), "A").await;
    let second = Arc::new(SqliteQueueStore::open(&path, Duration::from_secs(5)).unwrap());

    let retry = RetryPolicy {
        max_attempts: 5,
        backoff: Duration::from_millis(5),
    };
    let services = [
        Arc::new(NumberingService::new(first, retry, Duration::from_secs(10))),
        Arc::new(NumberingService::new(second, retry, Duration::from_secs(10))),
    ];

    let queue_date = queue_date_for(Utc::now());
    let handles: Vec<_> = (0..40)
        .map(|i| {
            let service = Arc::clone(&services[i % 2]);
            tokio::spawn(async move {
                service
                    .issue(IssueTicket {
                        category_id: general,
                        queue_date,
                        priority: None,
                        notes: None,
                        created_at: Utc::now(),
                    })
                    .await
                    .unwrap()
                    .applied()
                    .unwrap()
            })
        })
        .collect();

    let tickets: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let mut sequences: Vec<u32> = tickets.iter().map(|t| t.daily_sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=40).collect::<Vec<_>>());

    let numbers: HashSet<&str> = tickets.iter().map(|t| t.ticket_number.as_str()).collect();
    assert_eq!(numbers.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_next_across_connections_serves_each_ticket_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("queue.db");

    let first: Arc<dyn QueueStore> =
        Arc::new(SqliteQueueStore::open(&path, Duration::from_secs(5)).unwrap());
    let general = category(first.as_ref(), "A").await;
    let billing = category(first.as_ref(), "B").await;
    let second: Arc<dyn QueueStore> =
        Arc::new(SqliteQueueStore::open(&path, Duration::from_secs(5)).unwrap());
    let engines = [engine(Arc::clone(&first)), engine(Arc::clone(&second))];

    // Overlapping category sets, split across both connections.
    let mut counters = Vec::new();
    for (i, (number, categories)) in [
        ("1", vec![general]),
        ("2", vec![general, billing]),
        ("3", vec![billing]),
        ("4", vec![general, billing]),
    ]
    .into_iter()
    .enumerate()
    {
        let counter = first
            .create_counter(
                NewCounter {
                    number: number.to_string(),
                    name: None,
                    category_ids: categories,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let engine = Arc::clone(&engines[i % 2]);
        engine.open_counter(counter.id, None).await.unwrap();
        counters.push((counter.id, engine));
    }

    let mut issued = HashSet::new();
    for i in 0..40 {
        let category_id = if i % 2 == 0 { general } else { billing };
        let ticket = engines[i % 2]
            .issue_ticket(IssueRequest {
                category_id,
                ..Default::default()
            })
            .await
            .unwrap()
            .applied()
            .unwrap();
        issued.insert(ticket.id);
    }

    let workers: Vec<_> = counters
        .into_iter()
        .map(|(counter_id, engine)| {
            tokio::spawn(async move {
                let mut served = Vec::new();
                loop {
                    let outcome = match engine.call_next(counter_id).await {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_transient() => continue,
                        Err(err) => panic!("call_next failed: {}", err),
                    };
                    match outcome {
                        CallOutcome::Called { ticket, .. } => {
                            served.push(ticket.id);
                            loop {
                                match engine.complete_ticket(counter_id).await {
                                    Ok(_) => break,
                                    Err(err) if err.is_transient() => continue,
                                    Err(err) => panic!("complete failed: {}", err),
                                }
                            }
                        }
                        CallOutcome::QueueEmpty { .. } => break,
                        CallOutcome::Busy(rejection) => panic!("unexpected {}", rejection),
                    }
                }
                served
            })
        })
        .collect();

    let served: Vec<i64> = join_all(workers)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();

    let unique: HashSet<i64> = served.iter().copied().collect();
    assert_eq!(unique.len(), served.len(), "a ticket was served twice");
    assert_eq!(unique, issued, "a ticket was skipped");
    assert!(second.serving_tickets().await.unwrap().is_empty());
}
