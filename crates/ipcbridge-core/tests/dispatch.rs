use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ipcbridge_core::{
    Bridge, BridgeConfig, BridgeState, DataMessage, DispatchReport, LocalObject, LocalRuntime,
    LocalRuntimeConfig, ReceiveError, SubscriberId,
};
use ipcbridge_link::MemoryTransport;

type TestBridge = Bridge<LocalRuntime, MemoryTransport>;
type Deliveries = Arc<Mutex<Vec<(u8, u8, Vec<u8>)>>>;

fn started(config: BridgeConfig, runtime: LocalRuntime) -> Arc<TestBridge> {
    let bridge = Bridge::new(MemoryTransport::new(), config);
    assert!(bridge.init(runtime));
    bridge
}

fn bridge() -> Arc<TestBridge> {
    started(BridgeConfig::default(), LocalRuntime::new())
}

fn recorder(bridge: &TestBridge) -> (LocalObject, Deliveries) {
    let deliveries: Deliveries = Arc::default();
    let sink = Arc::clone(&deliveries);
    let object = bridge.runtime().unwrap().object(
        move |group: u8, id: u8, buffer: &[u8]| -> Result<(), ReceiveError> {
            sink.lock().unwrap().push((group, id, buffer.to_vec()));
            Ok(())
        },
    );
    (object, deliveries)
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn small_then_large_message_then_unregister() {
    let bridge = bridge();
    let a = SubscriberId(0xA);
    let (object, deliveries) = recorder(&bridge);

    bridge.register(a, object).unwrap();
    assert_eq!(bridge.buffer_capacity(a), Some(1024));
    assert_eq!(bridge.transport().callback_count(), 1);

    let small = payload(64, 1);
    bridge
        .transport()
        .deliver(&DataMessage::copy_from(2, 3, &small));
    assert_eq!(bridge.buffer_capacity(a), Some(1024));
    {
        let seen = deliveries.lock().unwrap();
        let (group, id, buffer) = &seen[0];
        assert_eq!((*group, *id), (2, 3));
        assert_eq!(buffer.len(), 1024);
        assert_eq!(&buffer[..64], small.as_slice());
    }

    let large = payload(2048, 9);
    bridge
        .transport()
        .deliver(&DataMessage::copy_from(2, 4, &large));
    assert_eq!(bridge.buffer_capacity(a), Some(2048));
    assert_eq!(deliveries.lock().unwrap()[1].2, large);

    assert!(bridge.unregister(a));
    assert_eq!(bridge.transport().callback_count(), 0);
    assert_eq!(bridge.state(), BridgeState::Inactive);

    bridge
        .transport()
        .deliver(&DataMessage::copy_from(2, 5, b"late"));
    assert_eq!(deliveries.lock().unwrap().len(), 2);
    assert_eq!(bridge.runtime().unwrap().live_refs(), 0);
}

#[test]
fn re_registering_an_identity_keeps_one_entry() {
    let bridge = bridge();
    let id = SubscriberId(1);
    let (first, first_seen) = recorder(&bridge);
    bridge.register(id, first).unwrap();
    let refs_with_one = bridge.runtime().unwrap().live_refs();

    let (second, second_seen) = recorder(&bridge);
    bridge.register(id, second).unwrap();

    assert_eq!(bridge.subscriber_count(), 1);
    assert_eq!(bridge.runtime().unwrap().live_refs(), refs_with_one);

    let report = bridge.dispatch(&DataMessage::copy_from(1, 1, b"x"));
    assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
    assert!(first_seen.lock().unwrap().is_empty());
    assert_eq!(second_seen.lock().unwrap().len(), 1);
}

#[test]
fn faulting_subscriber_does_not_block_others() {
    let bridge = bridge();
    let runtime = bridge.runtime().unwrap();
    let (good, seen) = recorder(&bridge);

    bridge
        .register(
            SubscriberId(1),
            runtime.object(|_: u8, _: u8, _: &[u8]| -> Result<(), ReceiveError> {
                Err("subscriber threw".into())
            }),
        )
        .unwrap();
    bridge
        .register(
            SubscriberId(2),
            runtime.object(|_: u8, _: u8, _: &[u8]| -> Result<(), ReceiveError> {
                panic!("subscriber crashed")
            }),
        )
        .unwrap();
    bridge.register(SubscriberId(3), good).unwrap();

    let report = bridge.dispatch(&DataMessage::copy_from(5, 6, b"ok"));
    assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
    assert_eq!(seen.lock().unwrap().len(), 1);

    // Faults are cleared; the next message is processed normally.
    let report = bridge.dispatch(&DataMessage::copy_from(5, 7, b"ok"));
    assert_eq!(report.delivered, 1);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn capped_growth_truncates_copy() {
    let bridge = started(
        BridgeConfig::default().with_max_buffer_capacity(1500),
        LocalRuntime::new(),
    );
    let id = SubscriberId(1);
    let (object, seen) = recorder(&bridge);
    bridge.register(id, object).unwrap();

    let message = payload(2000, 0);
    let report = bridge.dispatch(&DataMessage::copy_from(1, 1, &message));
    assert_eq!(report.delivered, 1);
    assert_eq!(bridge.buffer_capacity(id), Some(1500));
    assert_eq!(seen.lock().unwrap()[0].2, message[..1500].to_vec());
}

#[test]
fn failed_growth_skips_subscriber_and_keeps_buffer() {
    let bridge = started(
        BridgeConfig::default(),
        LocalRuntime::with_config(LocalRuntimeConfig {
            max_array_len: Some(1500),
        }),
    );
    let id = SubscriberId(1);
    let (object, seen) = recorder(&bridge);
    bridge.register(id, object).unwrap();

    let report = bridge.dispatch(&DataMessage::copy_from(1, 1, &payload(2000, 0)));
    assert_eq!(report, DispatchReport { delivered: 0, failed: 1 });
    assert_eq!(bridge.buffer_capacity(id), Some(1024));

    let report = bridge.dispatch(&DataMessage::copy_from(1, 2, b"fits"));
    assert_eq!(report.delivered, 1);
    assert_eq!(&seen.lock().unwrap()[0].2[..4], b"fits");
}

#[test]
fn dispatch_without_runtime_drops_message() {
    let bridge: Arc<TestBridge> = Bridge::new(MemoryTransport::new(), BridgeConfig::default());
    let report = bridge.dispatch(&DataMessage::copy_from(1, 1, b"x"));
    assert_eq!(report, DispatchReport::default());
}

#[test]
fn foreign_thread_is_attached_and_detached() {
    let bridge = bridge();
    let (object, seen) = recorder(&bridge);
    bridge.register(SubscriberId(1), object).unwrap();
    let runtime = bridge.runtime().unwrap();
    let (attaches, detaches) = (runtime.attach_count(), runtime.detach_count());

    let worker = Arc::clone(&bridge);
    std::thread::spawn(move || {
        worker
            .transport()
            .deliver(&DataMessage::copy_from(1, 1, b"from native"));
    })
    .join()
    .unwrap();

    assert_eq!(runtime.attach_count(), attaches + 1);
    assert_eq!(runtime.detach_count(), detaches + 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn managed_thread_is_never_detached() {
    let bridge = bridge();
    let (object, seen) = recorder(&bridge);
    bridge.register(SubscriberId(1), object).unwrap();
    let runtime = bridge.runtime().unwrap();
    let (attaches, detaches) = (runtime.attach_count(), runtime.detach_count());

    let worker = Arc::clone(&bridge);
    std::thread::spawn(move || {
        let runtime = worker.runtime().unwrap();
        let _scope = runtime.enter_managed_thread();
        worker.dispatch(&DataMessage::copy_from(1, 1, b"managed"));
        assert!(runtime.is_current_thread_attached());
    })
    .join()
    .unwrap();

    assert_eq!(runtime.attach_count(), attaches);
    assert_eq!(runtime.detach_count(), detaches);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn attach_failure_aborts_whole_dispatch() {
    let bridge = bridge();
    let (object, seen) = recorder(&bridge);
    bridge.register(SubscriberId(1), object).unwrap();
    let runtime = bridge.runtime().unwrap();
    runtime.shutdown();

    let worker = Arc::clone(&bridge);
    let report = std::thread::spawn(move || {
        worker.dispatch(&DataMessage::copy_from(1, 1, b"lost"))
    })
    .join()
    .unwrap();

    assert_eq!(report, DispatchReport::default());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(runtime.invocation_count(), 0);
}

#[test]
fn subscriber_may_change_registrations_while_invoked() {
    let bridge = bridge();
    let weak: Weak<TestBridge> = Arc::downgrade(&bridge);
    let (late, late_seen) = recorder(&bridge);
    let late = Mutex::new(Some(late));

    let object = bridge.runtime().unwrap().object(
        move |_: u8, _: u8, _: &[u8]| -> Result<(), ReceiveError> {
            let Some(bridge) = weak.upgrade() else {
                return Ok(());
            };
            bridge.unregister(SubscriberId(1));
            if let Some(late) = late.lock().unwrap().take() {
                bridge.register(SubscriberId(2), late)?;
            }
            Ok(())
        },
    );
    bridge.register(SubscriberId(1), object).unwrap();

    let report = bridge.dispatch(&DataMessage::copy_from(1, 1, b"first"));
    assert_eq!(report.delivered, 1);
    assert!(!bridge.is_registered(SubscriberId(1)));
    assert!(bridge.is_registered(SubscriberId(2)));
    assert_eq!(bridge.state(), BridgeState::Active);
    // Registered mid-dispatch: not part of that message's snapshot.
    assert!(late_seen.lock().unwrap().is_empty());

    bridge.dispatch(&DataMessage::copy_from(1, 2, b"second"));
    assert_eq!(late_seen.lock().unwrap().len(), 1);
}

#[test]
fn concurrent_dispatch_and_registration_leaks_nothing() {
    let bridge = bridge();
    let senders: Vec<_> = (0..4u8)
        .map(|seed| {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || {
                for round in 0..50usize {
                    let size = 512 + (round * 97 + seed as usize * 31) % 3000;
                    bridge
                        .transport()
                        .deliver(&DataMessage::copy_from(seed, round as u8, &payload(size, seed)));
                }
            })
        })
        .collect();

    for round in 0..100u64 {
        let (object, _) = recorder(&bridge);
        bridge.register(SubscriberId(round % 5), object).unwrap();
        if round % 3 == 0 {
            bridge.unregister(SubscriberId((round + 1) % 5));
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    for sender in senders {
        sender.join().unwrap();
    }

    bridge.shutdown();
    assert_eq!(bridge.runtime().unwrap().live_refs(), 0);
    assert_eq!(bridge.transport().callback_count(), 0);
}
