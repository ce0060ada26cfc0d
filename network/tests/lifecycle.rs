//! Queue lifecycle: stop semantics, handles, execution modes.

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use morpheus_netadapter::mainloop::{Notification, WakeEvent};
use morpheus_netadapter::{
    CompletionStatus, ContextState, DatapathError, DriverConfig, NblChain, QueueConfig, QueueKind,
};

#[test]
fn test_stop_completes_every_accepted_list() {
    let adapter = LoopbackAdapter::new(small_caps());
    let wire = adapter.wire();
    wire.lock().unwrap().hold_tx = true;
    let mut qc = control(adapter, DriverConfig::default());
    let done = Collector::default();
    let tx = qc.create_queue(QueueConfig::tx(0), done.callback()).unwrap();
    qc.start().unwrap();

    qc.enqueue(tx, chain((0..10).map(|i| single(i, &udp_frame(i as usize))))).unwrap();
    poll_until(&mut qc, || wire.lock().unwrap().transmitted.len() == 10);
    assert_eq!(done.len(), 0, "adapter still holds every packet");
    assert_eq!(qc.counters(tx).unwrap().queue_depth, 10);

    qc.stop();
    let lists = done.take();
    assert_eq!(lists.len(), 10);
    assert_eq!(lists.iter().map(|l| l.cookie).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    assert_eq!(qc.counters(tx).unwrap().queue_depth, 0);
    assert_eq!(qc.queue_state(tx).unwrap(), ContextState::Stopped);

    let wire = wire.lock().unwrap();
    assert_eq!(wire.cancels, 1);
    assert_eq!(wire.stops, 1);
}

#[test]
fn test_rx_stop_suspends_while_adapter_drains() {
    let adapter = LoopbackAdapter::new(small_caps());
    let wire = adapter.wire();
    let mut qc = control(adapter, DriverConfig::default());
    let rx = qc.create_queue(QueueConfig::rx(0), |_: NblChain| {}).unwrap();
    qc.start().unwrap();
    qc.poll();

    wire.lock().unwrap().slow_rx_cancel = true;
    let before = qc.counters(rx).unwrap().suspends;
    qc.stop();

    // Fifteen fragment slots, each followed by two idle advances.
    let suspends = qc.counters(rx).unwrap().suspends - before;
    assert!(suspends >= 15, "only {} suspends while draining", suspends);
    assert_eq!(qc.queue_state(rx).unwrap(), ContextState::Stopped);
    assert_eq!(wire.lock().unwrap().stops, 1);
}

#[test]
fn test_stop_is_idempotent_and_start_twice_fails() {
    let mut qc = control(LoopbackAdapter::new(small_caps()), DriverConfig::default());
    let tx = qc.create_queue(QueueConfig::tx(0), |_: NblChain| {}).unwrap();
    qc.stop();
    assert_eq!(qc.queue_state(tx).unwrap(), ContextState::Created);

    qc.start().unwrap();
    assert!(matches!(qc.start(), Err(DatapathError::InvalidState)));
    qc.stop();
    qc.stop();
    assert!(!qc.is_running());
}

#[test]
fn test_restart_after_stop() {
    let adapter = LoopbackAdapter::new(small_caps());
    let wire = adapter.wire();
    let mut qc = control(adapter, DriverConfig::default());
    let done = Collector::default();
    let tx = qc.create_queue(QueueConfig::tx(0), done.callback()).unwrap();

    qc.start().unwrap();
    qc.enqueue(tx, chain([single(1, &udp_frame(10))])).unwrap();
    poll_until(&mut qc, || done.len() == 1);
    qc.stop();

    // Held by the ingress while stopped.
    qc.enqueue(tx, chain([single(2, &udp_frame(20))])).unwrap();
    for _ in 0..5 {
        qc.poll();
    }
    assert_eq!(qc.ingress(tx).unwrap().pending(), 1);
    assert_eq!(done.len(), 1);

    qc.start().unwrap();
    poll_until(&mut qc, || done.len() == 2);
    let lists = done.take();
    assert_eq!(lists[1].cookie, 2);
    assert_eq!(lists[1].status(), CompletionStatus::Success);
    assert_eq!(wire.lock().unwrap().starts, 2);
}

#[test]
fn test_destroy_completes_held_lists_paused() {
    let mut qc = control(LoopbackAdapter::new(small_caps()), DriverConfig::default());
    let done = Collector::default();
    let tx = qc.create_queue(QueueConfig::tx(0), done.callback()).unwrap();

    qc.enqueue(tx, chain([single(7, &udp_frame(1)), single(8, &udp_frame(2))])).unwrap();
    qc.destroy_queue(tx).unwrap();

    let lists = done.take();
    assert_eq!(lists.len(), 2);
    assert!(lists.iter().all(|l| l.status() == CompletionStatus::Paused));
    assert_eq!(qc.queue_count(), 0);
}

#[test]
fn test_stale_handles_are_rejected() {
    let mut qc = control(LoopbackAdapter::new(small_caps()), DriverConfig::default());
    let old = qc.create_queue(QueueConfig::tx(0), |_: NblChain| {}).unwrap();
    qc.destroy_queue(old).unwrap();
    let new = qc.create_queue(QueueConfig::tx(1), |_: NblChain| {}).unwrap();

    assert!(matches!(qc.counters(old), Err(DatapathError::InvalidQueue)));
    assert!(matches!(qc.enqueue(old, chain([])), Err(DatapathError::InvalidQueue)));
    assert!(matches!(qc.destroy_queue(old), Err(DatapathError::InvalidQueue)));
    assert_eq!(qc.queue_config(new).unwrap().id, 1);
}

#[test]
fn test_duplicate_queue_id_rejected() {
    let mut qc = control(LoopbackAdapter::new(small_caps()), DriverConfig::default());
    qc.create_queue(QueueConfig::tx(0), |_: NblChain| {}).unwrap();
    assert!(matches!(
        qc.create_queue(QueueConfig::tx(0), |_: NblChain| {}),
        Err(DatapathError::InvalidConfig(_))
    ));
    // Same id, other direction.
    let rx = qc.create_queue(QueueConfig::rx(0), |_: NblChain| {}).unwrap();
    assert_eq!(rx.kind, QueueKind::Rx);
    assert!(matches!(qc.ingress(rx), Err(DatapathError::InvalidQueue)));
}

#[test]
fn test_queue_created_while_running_starts_immediately() {
    let adapter = LoopbackAdapter::new(small_caps());
    let mut qc = control(adapter, DriverConfig::default());
    qc.start().unwrap();
    let done = Collector::default();
    let tx = qc.create_queue(QueueConfig::tx(3), done.callback()).unwrap();
    assert_eq!(qc.queue_state(tx).unwrap(), ContextState::Started);

    qc.enqueue(tx, chain([single(1, &tcp_frame(100))])).unwrap();
    poll_until(&mut qc, || done.len() == 1);
}

#[test]
fn test_threaded_tx_from_other_thread() {
    let adapter = LoopbackAdapter::new(small_caps());
    let wire = adapter.wire();
    let mut qc = control(adapter, DriverConfig::threaded());
    let done = Collector::default();
    let tx = qc.create_queue(QueueConfig::tx(0), done.callback()).unwrap();
    qc.start().unwrap();

    let ingress = qc.ingress(tx).unwrap();
    let producer = thread::spawn(move || {
        for i in 0..50u64 {
            ingress.enqueue(chain([single(i, &udp_frame(i as usize))]));
        }
    });
    producer.join().unwrap();

    wait_until(|| done.len() == 50);
    qc.stop();
    let cookies: Vec<_> = done.take().iter().map(|l| l.cookie).collect();
    assert_eq!(cookies, (0..50).collect::<Vec<_>>());
    assert_eq!(wire.lock().unwrap().transmitted.len(), 50);
    assert_eq!(qc.queue_state(tx).unwrap(), ContextState::Stopped);
}

#[test]
fn test_threaded_rx_wakes_on_new_frames() {
    let adapter = LoopbackAdapter::new(small_caps());
    adapter.inject([udp_frame(5)]);
    let wire = adapter.wire();
    let mut qc = control(adapter, DriverConfig::threaded());
    let got = Collector::default();
    let rx = qc.create_queue(QueueConfig::rx(0), got.callback()).unwrap();
    qc.start().unwrap();
    wait_until(|| got.len() == 1);

    wire.lock().unwrap().inbound.push_back(udp_frame(6));
    qc.notify(rx).unwrap();
    wait_until(|| got.len() == 2);

    qc.stop();
    drop(got.take());
    assert_eq!(qc.queue_state(rx).unwrap(), ContextState::Stopped);
}

fn failing_sink(_: NblChain) {
    panic!("completion sink failed");
}

#[test]
fn test_failed_start_leaves_every_queue_stopped() {
    let mut qc = control(LoopbackAdapter::new(small_caps()), DriverConfig::threaded());
    let done = Collector::default();
    let good = qc.create_queue(QueueConfig::tx(0), done.callback()).unwrap();
    let bad = qc.create_queue(QueueConfig::tx(1), failing_sink).unwrap();

    // The second queue's worker dies on its first completion.
    qc.start().unwrap();
    qc.enqueue(bad, chain([single(1, &udp_frame(8))])).unwrap();
    qc.stop();

    assert!(matches!(qc.start(), Err(DatapathError::InvalidState)));
    assert!(!qc.is_running());
    assert_eq!(qc.queue_state(good).unwrap(), ContextState::Stopped);

    qc.destroy_queue(bad).unwrap();
    qc.start().unwrap();
    assert!(qc.is_running());
    qc.enqueue(good, chain([single(2, &udp_frame(9))])).unwrap();
    wait_until(|| done.len() == 1);
    qc.stop();
}

#[test]
fn test_armed_notification_wakes_once() {
    let wake = Arc::new(WakeEvent::new());
    let n = Notification::new(wake.clone());
    n.notify();
    assert!(!wake.is_set(), "disarmed notification is dropped");
    n.arm();
    n.notify();
    n.notify();
    assert!(wake.take());
    assert!(!wake.take());
}
