mod common;

use common::{feed, init_tracing, wait_until, Behavior, FailingRenderer, MockSource, RecordingRenderer};
use newsfab::scheduler::{control_channel, CONTROL_QUEUE_CAPACITY};
use newsfab::{
    Control, CycleController, Publisher, Renderer, SchedulerConfig, Scheduler, SchedulerState,
    SourceList, StopSignal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const A: &str = "https://a.example/rss";
const B: &str = "https://b.example/rss";
const C: &str = "https://c.example/rss";

fn three_feeds() -> MockSource {
    MockSource::new()
        .with(A, Behavior::Ok(feed(A, "Feed A", vec![])))
        .with(B, Behavior::Ok(feed(B, "Feed B", vec![])))
        .with(C, Behavior::Ok(feed(C, "Feed C", vec![])))
}

fn controller(source: MockSource, renderer: Arc<dyn Renderer>, fetch_timeout: Duration) -> CycleController {
    // No destination: output goes to stdout.
    CycleController::new(Arc::new(source), renderer, Publisher::new(None), fetch_timeout)
}

fn every(interval: Duration) -> SchedulerConfig {
    SchedulerConfig {
        interval,
        ..SchedulerConfig::default()
    }
}

#[tokio::test]
async fn test_reload_during_cycle_applies_to_next_cycle() {
    init_tracing();

    let gate = Arc::new(Semaphore::new(0));
    let source = Arc::new(three_feeds().gated(gate.clone()));
    let renderer = Arc::new(RecordingRenderer::default());
    let controller = CycleController::new(
        source.clone(),
        renderer.clone(),
        Publisher::new(None),
        Duration::from_secs(10),
    );

    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller,
        every(Duration::from_millis(50)),
        SourceList::new([A, B]),
        events,
    );
    let handle = tokio::spawn(scheduler.run());

    // Cycle 1 is blocked inside its fetches of A and B.
    wait_until("first cycle to start fetching", || source.calls().len() == 2).await;

    control.send(Control::Reload(SourceList::new([A, C]))).await.unwrap();
    wait_until("reload to be consumed", || control.capacity() == CONTROL_QUEUE_CAPACITY).await;

    gate.add_permits(1_000);
    wait_until("two cycles", || renderer.rendered().len() >= 2).await;

    control.send(Control::Stop(StopSignal::Terminate)).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    let rendered = renderer.rendered();
    assert_eq!(rendered[0], vec!["Feed A", "Feed B"], "first cycle keeps its own list");
    assert_eq!(rendered[1], vec!["Feed A", "Feed C"]);
    assert!(report.cycles >= 2);
    assert_eq!(report.failed_cycles, 0);
}

#[tokio::test]
async fn test_stop_during_cycle_abandons_fetches_after_grace() {
    init_tracing();

    let source = Arc::new(
        MockSource::new()
            .with(A, Behavior::Ok(feed(A, "Feed A", vec![])))
            .with(B, Behavior::Hang),
    );
    let renderer = Arc::new(RecordingRenderer::default());
    let controller = CycleController::new(
        source.clone(),
        renderer.clone(),
        Publisher::new(None),
        Duration::from_secs(600),
    );
    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_millis(100),
            ..SchedulerConfig::default()
        },
        SourceList::new([A, B]),
        events,
    );
    let state = scheduler.subscribe();
    let handle = tokio::spawn(scheduler.run());

    wait_until("both fetches to start", || source.calls().len() == 2).await;
    control.send(Control::Stop(StopSignal::Interrupt)).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stop was held up by a hanging source")
        .unwrap();

    assert_eq!(report.cycles, 1);
    assert_eq!(report.failed_cycles, 0);
    // The interrupted cycle still published what it had.
    assert_eq!(renderer.rendered(), vec![vec!["Feed A".to_string()]]);
    assert_eq!(*state.borrow(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_stop_during_cycle_keeps_fetches_within_grace() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("news.txt");
    std::fs::write(&destination, "previous page").unwrap();

    let delay = Duration::from_millis(200);
    let source = Arc::new(
        MockSource::new()
            .with(A, Behavior::Delay(delay, feed(A, "Feed A", vec![])))
            .with(B, Behavior::Delay(delay, feed(B, "Feed B", vec![]))),
    );
    let controller = CycleController::new(
        source.clone(),
        Arc::new(RecordingRenderer::default()),
        Publisher::new(Some(destination.clone())),
        Duration::from_secs(10),
    );
    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(5),
            ..SchedulerConfig::default()
        },
        SourceList::new([A, B]),
        events,
    );
    let handle = tokio::spawn(scheduler.run());

    wait_until("both fetches to start", || source.calls().len() == 2).await;
    control.send(Control::Stop(StopSignal::Terminate)).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(report.cycles, 1);
    let published = std::fs::read_to_string(&destination).unwrap();
    assert_eq!(published, "feeds: Feed A, Feed B\n", "in-flight fetches were dropped");
}

#[tokio::test]
async fn test_zero_grace_stops_without_waiting() {
    init_tracing();

    let source = Arc::new(MockSource::new().with(A, Behavior::Hang));
    let controller = CycleController::new(
        source.clone(),
        Arc::new(RecordingRenderer::default()),
        Publisher::new(None),
        Duration::from_secs(600),
    );
    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            shutdown_grace: Duration::ZERO,
            ..SchedulerConfig::default()
        },
        SourceList::new([A]),
        events,
    );
    let handle = tokio::spawn(scheduler.run());

    wait_until("the fetch to start", || source.calls().len() == 1).await;
    control.send(Control::Stop(StopSignal::Interrupt)).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(report.cycles, 1);
}

#[tokio::test]
async fn test_once_mode_runs_a_single_cycle() {
    init_tracing();

    let renderer = Arc::new(RecordingRenderer::default());
    let (_control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller(three_feeds(), renderer.clone(), Duration::from_secs(5)),
        SchedulerConfig {
            interval: Duration::from_millis(10),
            once: true,
            ..SchedulerConfig::default()
        },
        SourceList::new([A, B, C]),
        events,
    );

    let report = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("once mode kept running");

    assert_eq!(report.cycles, 1);
    assert_eq!(renderer.rendered().len(), 1);
}

#[tokio::test]
async fn test_stop_while_waiting() {
    init_tracing();

    let renderer = Arc::new(RecordingRenderer::default());
    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller(three_feeds(), renderer.clone(), Duration::from_secs(5)),
        every(Duration::from_secs(3600)),
        SourceList::new([A]),
        events,
    );
    let mut state = scheduler.subscribe();
    let handle = tokio::spawn(scheduler.run());

    state.wait_for(|s| *s == SchedulerState::Waiting).await.unwrap();
    control.send(Control::Stop(StopSignal::Terminate)).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(report.cycles, 1);
    assert_eq!(renderer.rendered().len(), 1);
}

#[tokio::test]
async fn test_closing_the_control_channel_stops_the_scheduler() {
    init_tracing();

    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller(three_feeds(), Arc::new(RecordingRenderer::default()), Duration::from_secs(5)),
        every(Duration::from_secs(3600)),
        SourceList::new([A]),
        events,
    );
    drop(control);

    let report = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("scheduler ignored the closed channel");
    assert_eq!(report.cycles, 1);
}

#[tokio::test]
async fn test_interval_drives_repeated_cycles() {
    init_tracing();

    let renderer = Arc::new(RecordingRenderer::default());
    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller(three_feeds(), renderer.clone(), Duration::from_secs(5)),
        every(Duration::from_millis(20)),
        SourceList::new([A]),
        events,
    );
    let handle = tokio::spawn(scheduler.run());

    wait_until("three cycles", || renderer.rendered().len() >= 3).await;
    control.send(Control::Stop(StopSignal::Interrupt)).await.unwrap();

    let report = handle.await.unwrap();
    assert!(report.cycles >= 3);
}

#[tokio::test]
async fn test_failed_cycles_are_counted_and_do_not_stop_the_loop() {
    init_tracing();

    let (control, events) = control_channel();
    let scheduler = Scheduler::new(
        controller(three_feeds(), Arc::new(FailingRenderer), Duration::from_secs(5)),
        every(Duration::from_millis(20)),
        SourceList::new([A]),
        events,
    );
    let mut state = scheduler.subscribe();
    let handle = tokio::spawn(scheduler.run());

    // Two trips through Waiting mean the loop survived a failed cycle.
    state.wait_for(|s| *s == SchedulerState::Waiting).await.unwrap();
    state.wait_for(|s| *s == SchedulerState::RunningCycle).await.unwrap();
    state.wait_for(|s| *s == SchedulerState::Waiting).await.unwrap();
    control.send(Control::Stop(StopSignal::Terminate)).await.unwrap();

    let report = handle.await.unwrap();
    assert!(report.cycles >= 2);
    assert_eq!(report.failed_cycles, report.cycles);
}
