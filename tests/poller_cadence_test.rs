//! Timing and termination behavior of the polling task.
//!
//! All tests run on a paused tokio clock, so instrument latency and
//! intervals are simulated exactly.

use bench_daq::{
    adapters::MockTransport,
    instrument::{InstrumentType, MeasurementFunction},
    poller::{PollEvent, PollInterval, PollRequest, Poller, PollerConfig, PollerState},
    scpi::ScpiClient,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const VOLTAGE_QUERY: &str = "MEASure:VOLTage?";
const CURRENT_QUERY: &str = "MEASure:CURRent?";

fn two_slots() -> Vec<PollRequest> {
    vec![
        PollRequest {
            slot_index: 0,
            function: MeasurementFunction::Voltage,
            query_command: VOLTAGE_QUERY,
            unit: "V",
        },
        PollRequest {
            slot_index: 1,
            function: MeasurementFunction::Current,
            query_command: CURRENT_QUERY,
            unit: "A",
        },
    ]
}

fn config(interval_ms: u64) -> PollerConfig {
    PollerConfig {
        instrument: InstrumentType::OwonSpe6103,
        device_identity: "OWON,SPE6103,2214001,FV:V1.2.0".to_string(),
        requests: two_slots(),
        interval: PollInterval::from_millis(interval_ms).unwrap(),
    }
}

async fn open_client(mock: &MockTransport) -> ScpiClient {
    let client = ScpiClient::new(mock.clone());
    client.open().await.unwrap();
    client
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PollEvent>) -> Vec<PollEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_cycle_start_cadence_ignores_query_latency() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103)
        .with_latency(Duration::from_millis(50));
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let mut poller = Poller::start(client, config(1000), tx);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(poller.stop_and_join(Duration::from_millis(1500)).await);

    let slot0_starts: Vec<Instant> = mock
        .frames()
        .into_iter()
        .filter(|frame| frame.command == VOLTAGE_QUERY)
        .map(|frame| frame.at)
        .collect();
    assert_eq!(slot0_starts.len(), 4, "cycles at 0, 1000, 2000 and 3000 ms");

    for pair in slot0_starts.windows(2) {
        let spacing = pair[1] - pair[0];
        assert!(
            spacing >= Duration::from_millis(980) && spacing <= Duration::from_millis(1020),
            "cycle spacing drifted: {:?}",
            spacing
        );
    }

    // readings follow slot order within every cycle
    let slots: Vec<usize> = drain(&mut rx)
        .into_iter()
        .map(|event| match event {
            PollEvent::Reading(reading) => reading.slot_index,
            PollEvent::Error(message) => panic!("unexpected error: {}", message),
        })
        .collect();
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_queries_start_next_cycle_immediately() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103)
        .with_latency(Duration::from_millis(150));
    let client = open_client(&mock).await;
    let (tx, _rx) = mpsc::unbounded_channel::<PollEvent>();

    // two 150 ms queries exceed the 200 ms interval
    let mut poller = Poller::start(client, config(200), tx);
    tokio::time::sleep(Duration::from_millis(950)).await;
    assert!(poller.stop_and_join(Duration::from_millis(1500)).await);

    let slot0_starts: Vec<Instant> = mock
        .frames()
        .into_iter()
        .filter(|frame| frame.command == VOLTAGE_QUERY)
        .map(|frame| frame.at)
        .collect();
    assert!(slot0_starts.len() >= 3);
    for pair in slot0_starts.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(300));
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_wait_returns_without_another_cycle() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103)
        .with_latency(Duration::from_millis(50));
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let mut poller = Poller::start(client, config(10_000), tx);
    for _ in 0..2 {
        assert!(matches!(rx.recv().await, Some(PollEvent::Reading(_))));
    }
    // first cycle done, the task is now in its 9.9 s wait
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stop_requested = Instant::now();
    poller.stop();
    assert_eq!(poller.state(), PollerState::Stopping);
    assert!(poller.join(Duration::from_millis(1500)).await);

    assert!(Instant::now() - stop_requested < Duration::from_millis(20));
    assert_eq!(poller.state(), PollerState::Stopped);
    assert_eq!(mock.commands().len(), 2);
    assert!(rx.recv().await.is_none(), "sink dropped after exit");
}

#[tokio::test(start_paused = true)]
async fn test_stop_between_slots_skips_remaining_slots() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103)
        .with_latency(Duration::from_millis(100));
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let mut poller = Poller::start(client, config(1000), tx);
    // slot 0 is answered at 100 ms; stop while it is in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    poller.stop();
    assert!(poller.join(Duration::from_millis(1500)).await);

    // the in-flight query completes but slot 1 is never issued
    assert_eq!(mock.commands(), vec![VOLTAGE_QUERY]);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], PollEvent::Reading(r) if r.slot_index == 0));
}

#[tokio::test(start_paused = true)]
async fn test_second_slot_failure_is_terminal() {
    // slot 0 always answers, slot 1 never does
    let mock = MockTransport::new()
        .with_response(VOLTAGE_QUERY, "5.000")
        .with_timeout(Duration::from_millis(500));
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let mut poller = Poller::start(client, config(1000), tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(poller.join(Duration::from_millis(100)).await);

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], PollEvent::Reading(r) if r.value == Some(5.0)));
    match &events[1] {
        PollEvent::Error(message) => assert!(message.contains(CURRENT_QUERY)),
        other => panic!("expected an error, got {:?}", other),
    }
    assert_eq!(poller.state(), PollerState::Stopped);

    // no retries and no further cycles
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.commands(), vec![VOLTAGE_QUERY, CURRENT_QUERY]);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_mid_session_reports_once() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103).fail_after_queries(3);
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let mut poller = Poller::start(client, config(200), tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(poller.join(Duration::from_millis(100)).await);

    let errors = events
        .iter()
        .filter(|e| matches!(e, PollEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(events.len(), 4, "three readings then the error");
    assert!(matches!(events.last(), Some(PollEvent::Error(_))));
    assert_eq!(poller.state(), PollerState::Stopped);

    // a stop after the fatal error is a no-op
    poller.stop();
    assert_eq!(poller.state(), PollerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_task() {
    let mock = MockTransport::for_instrument(InstrumentType::OwonSpe6103);
    let client = open_client(&mock).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();

    let poller = Poller::start(client, config(1000), tx);
    assert!(matches!(rx.recv().await, Some(PollEvent::Reading(_))));
    drop(poller);

    // the task exits and drops its sender
    let mut remaining = 0;
    while rx.recv().await.is_some() {
        remaining += 1;
    }
    assert!(remaining <= 1);
}
