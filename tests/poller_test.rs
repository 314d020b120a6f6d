mod common;

use chrono::{TimeZone, Utc};
use common::{row, settings, ManualClock, RecordingSink, ScriptedSource, Step};
use pg_poller::cdc::{PrimaryKey, Row, Value};
use pg_poller::{Error, Poller, PollerState};
use std::time::Duration;

async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_three_cycle_scenario() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![
        Step::Rows(vec![row(1, "a")]),
        Step::Rows(vec![row(1, "a"), row(2, "b")]),
        Step::Rows(vec![row(2, "b")]),
    ]);

    let job = settings("SELECT id, v FROM t", true);
    let handle = Poller::with_clock(job, source, sink.clone(), clock.clone()).spawn();

    wait_until(|| clock.sleeps().len() == 1).await;
    let first = sink.take();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].tag, "replicator.test.insert.id");
    assert_eq!(first[0].record, row(1, "a"));

    clock.release(1);
    wait_until(|| clock.sleeps().len() == 2).await;
    let second = sink.take();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].tag, "replicator.test.insert.id");
    assert_eq!(second[0].record, row(2, "b"));

    clock.release(1);
    wait_until(|| clock.sleeps().len() == 3).await;
    let third = sink.take();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].tag, "replicator.test.delete.id");
    assert_eq!(third[0].record, Row::new().with("id", 1i64));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_events_carry_clock_time() {
    let now = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
    let clock = ManualClock::new(now);
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![Step::Rows(vec![row(1, "a"), row(2, "b")])]);

    let mut poller = Poller::with_clock(settings("q", true), source, sink.clone(), clock);
    poller.poll_once().await.unwrap();

    let events = sink.take();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.time == now));
}

#[tokio::test]
async fn test_update_carries_new_row_content() {
    let clock = ManualClock::new(Utc::now());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![
        Step::Rows(vec![row(1, "a"), row(2, "b")]),
        Step::Rows(vec![row(1, "a"), row(2, "b2")]),
    ]);

    let mut poller = Poller::with_clock(settings("q", true), source, sink.clone(), clock);
    poller.poll_once().await.unwrap();
    sink.take();

    let stats = poller.poll_once().await.unwrap();
    assert_eq!((stats.inserted, stats.updated, stats.deleted), (0, 1, 0));

    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tag, "replicator.test.update.id");
    assert_eq!(events[0].record.get("v"), Some(&Value::from("b2")));
}

#[tokio::test]
async fn test_delete_disabled_emits_nothing_for_missing_rows() {
    let clock = ManualClock::new(Utc::now());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![
        Step::Rows(vec![row(1, "a"), row(2, "b")]),
        Step::Rows(vec![row(1, "a")]),
    ]);

    let mut poller = Poller::with_clock(settings("q", false), source, sink.clone(), clock);
    poller.poll_once().await.unwrap();
    sink.take();

    let stats = poller.poll_once().await.unwrap();
    assert_eq!(stats.events(), 0);
    assert!(sink.take().is_empty());
    assert!(poller.detector_state().contains(&PrimaryKey::Integer(2)));
}

#[tokio::test]
async fn test_retries_connection_failures_with_interval_backoff() {
    let clock = ManualClock::new(Utc::now());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![
        Step::Fail("connection refused"),
        Step::Fail("connection reset"),
        Step::Rows(vec![row(1, "a")]),
    ]);
    let executions = source.executions.clone();

    // both retry sleeps complete immediately
    clock.release(2);
    let handle =
        Poller::with_clock(settings("q", true), source, sink.clone(), clock.clone()).spawn();

    wait_until(|| clock.sleeps().len() == 3).await;
    assert_eq!(*executions.lock().unwrap(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 3]);
    assert_eq!(sink.take().len(), 1);
    assert_eq!(handle.state(), PollerState::Sleeping);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_retry_backoff_releases_source() {
    let clock = ManualClock::new(Utc::now());
    let source = ScriptedSource::new(vec![Step::Fail("down"), Step::Fail("down")]);
    let closed = source.closed.clone();

    let sink = RecordingSink::default();
    let handle = Poller::with_clock(settings("q", true), source, sink, clock.clone()).spawn();

    wait_until(|| clock.sleeps().len() == 1).await;
    assert_eq!(handle.state(), PollerState::Running);

    let mut state = handle.subscribe();
    handle.stop().await.unwrap();

    assert_eq!(*state.borrow_and_update(), PollerState::Cancelled);
    assert!(*closed.lock().unwrap());
}

#[tokio::test]
async fn test_missing_primary_key_stops_poller() {
    let clock = ManualClock::new(Utc::now());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new(vec![Step::Rows(vec![
        row(1, "a"),
        Row::new().with("v", "orphan"),
    ])]);
    let closed = source.closed.clone();

    let handle = Poller::with_clock(settings("q", true), source, sink.clone(), clock).spawn();
    let mut state = handle.subscribe();

    let result = handle.join().await;
    assert!(matches!(result, Err(Error::MissingKey { ref column }) if column == "id"));
    assert_eq!(*state.borrow_and_update(), PollerState::Failed);
    assert!(*closed.lock().unwrap());
    // the row before the bad one was already emitted
    assert_eq!(sink.take().len(), 1);
}
