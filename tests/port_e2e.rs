use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};

use paramcache::{
    AlarmSeverity, CacheError, InterruptReason, IoStatus, ParamError, ParamType, Port, PortConfig, ReadinessGate,
    SubscriptionFilter, Update,
};

const WAIT: Duration = Duration::from_secs(2);

#[test]
fn gate_opening_runs_one_catch_up_pass() {
    let gate = ReadinessGate::new();
    let port = Port::new(PortConfig::new("catchup", 2), gate.clone()).unwrap();

    let (tx, rx) = unbounded();
    port.subscribe_fn::<f64, _>(SubscriptionFilter::any().at_address(1), move |u: &Update<'_, f64>| {
        let _ = tx.send((u.addr, *u.value));
    });
    let (tx0, rx0) = unbounded();
    port.subscribe_fn::<i32, _>(SubscriptionFilter::any(), move |u: &Update<'_, i32>| {
        let _ = tx0.send((u.addr, *u.value));
    });

    {
        let mut guard = port.lock().unwrap();
        let volts = guard.create_param("VOLTS", ParamType::Float64).unwrap();
        let count = guard.create_param("COUNT", ParamType::Integer32).unwrap();
        guard.set_float(1, volts, 1.25).unwrap();
        guard.set_integer(0, count, 7).unwrap();

        let stats = guard.dispatch(1).unwrap();
        assert!(!stats.ran);
        assert!(guard.store(1).unwrap().is_changed(volts).unwrap());
    }
    assert!(rx.try_recv().is_err());

    assert!(gate.open());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (1, 1.25));
    assert_eq!(rx0.recv_timeout(WAIT).unwrap(), (0, 7));

    // The catch-up pass drained everything; a later explicit pass is empty.
    let mut guard = port.lock().unwrap();
    assert_eq!(guard.dispatch_all().delivered, 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn float_subscriber_sees_only_its_address() {
    let port = Port::new(PortConfig::new("addr", 4), ReadinessGate::opened()).unwrap();
    let (tx, rx) = unbounded();
    port.subscribe_fn::<f64, _>(SubscriptionFilter::any().at_address(2), move |u: &Update<'_, f64>| {
        let _ = tx.send(u.addr);
    });

    let mut guard = port.lock().unwrap();
    let id = guard.create_param("V", ParamType::Float64).unwrap();
    guard.set_float(3, id, 1.0).unwrap();
    guard.dispatch(3).unwrap();
    assert!(rx.try_recv().is_err());

    guard.set_float(2, id, 1.0).unwrap();
    guard.dispatch(2).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
}

#[test]
fn repeated_same_value_notifies_once_unless_forced() {
    let port = Port::new(PortConfig::new("idem", 1), ReadinessGate::opened()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let bit_hits = Arc::new(AtomicUsize::new(0));

    let mut guard = port.lock().unwrap();
    let n = guard.create_param("N", ParamType::Integer32).unwrap();
    let bits = guard.create_param("BITS", ParamType::BitField32).unwrap();
    drop(guard);

    let h = Arc::clone(&hits);
    port.subscribe_fn::<i32, _>(SubscriptionFilter::slot(n), move |_u: &Update<'_, i32>| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    let b = Arc::clone(&bit_hits);
    port.subscribe_fn::<u32, _>(SubscriptionFilter::slot(bits).with_mask(0b0001), move |_u: &Update<'_, u32>| {
        b.fetch_add(1, Ordering::SeqCst);
    });

    let mut guard = port.lock().unwrap();
    for _ in 0..3 {
        guard.set_integer(0, n, 5).unwrap();
        guard.set_bitfield(0, bits, 0b1011, 0b1111, 0).unwrap();
        guard.dispatch(0).unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(bit_hits.load(Ordering::SeqCst), 1);

    // Edge re-trigger: same value, interrupt mask forces a callback.
    guard.set_bitfield(0, bits, 0b1011, 0b1111, 0b0001).unwrap();
    guard.dispatch(0).unwrap();
    assert_eq!(bit_hits.load(Ordering::SeqCst), 2);
}

#[test]
fn status_and_alarm_travel_with_updates() {
    let port = Port::new(PortConfig::new("alarm", 1), ReadinessGate::opened()).unwrap();
    let (tx, rx) = unbounded();
    port.subscribe_fn::<str, _>(SubscriptionFilter::any(), move |u: &Update<'_, str>| {
        let _ = tx.send((u.value.to_string(), u.status, u.alarm));
    });

    let mut guard = port.lock().unwrap();
    let id = guard.create_param("MSG", ParamType::Text).unwrap();
    guard.set_text(0, id, "ok").unwrap();
    guard.dispatch(0).unwrap();
    let (text, status, alarm) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(text, "ok");
    assert!(status.is_success());
    assert!(!alarm.is_raised());

    guard.set_status(0, id, IoStatus::Disconnected).unwrap();
    guard.set_alarm_severity(0, id, AlarmSeverity::Invalid).unwrap();
    guard.dispatch(0).unwrap();
    let (text, status, alarm) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(text, "ok");
    assert_eq!(status, IoStatus::Disconnected);
    assert_eq!(alarm.severity, AlarmSeverity::Invalid);
}

#[test]
fn errors_are_typed_and_distinguishable() {
    let port = Port::new(PortConfig::new("errors", 1), ReadinessGate::opened()).unwrap();
    let mut guard = port.lock().unwrap();
    let id = guard.create_param("F", ParamType::Float64).unwrap();

    let undefined = guard.get_float(0, id).unwrap_err();
    assert!(undefined.is_expected());

    let mismatch = guard.set_integer(0, id, 1).unwrap_err();
    assert!(matches!(mismatch, CacheError::Param(ParamError::TypeMismatch { .. })));
    assert!(!mismatch.is_expected());

    let missing = guard.find_param(0, "nope").unwrap_err();
    assert!(matches!(missing, CacheError::Param(ParamError::NotFound { .. })));

    let bits = guard.create_param("B", ParamType::BitField32).unwrap();
    guard.set_bit_interrupt(0, bits, 0xF0, InterruptReason::OneToZero).unwrap();
    assert_eq!(guard.get_bit_interrupt(0, bits, InterruptReason::OneToZero).unwrap(), 0xF0);
    assert_eq!(guard.get_bit_interrupt(0, bits, InterruptReason::ZeroToOne).unwrap(), 0);
    assert!(guard.set_bit_interrupt(0, id, 1, InterruptReason::Both).is_err());
}

#[test]
fn arrays_are_published_from_caller_buffers() {
    let port = Port::new(PortConfig::new("arrays", 2), ReadinessGate::opened()).unwrap();
    let (tx, rx) = unbounded();

    let mut guard = port.lock().unwrap();
    let wave = guard.create_param("WAVE", ParamType::Int32Array).unwrap();
    guard.set_alarm_status(1, wave, 3).unwrap();
    drop(guard);

    port.subscribe_fn::<[i32], _>(SubscriptionFilter::slot(wave).at_address(1), move |u: &Update<'_, [i32]>| {
        let _ = tx.send((u.value.iter().sum::<i32>(), u.alarm.status));
    });

    let buffer: Vec<i32> = (1..=10).collect();
    let guard = port.lock().unwrap();
    assert_eq!(guard.publish::<[i32]>(1, wave, &buffer).unwrap(), 1);
    assert_eq!(guard.publish::<[i32]>(0, wave, &buffer).unwrap(), 0);
    assert!(guard.publish::<[f64]>(1, wave, &[1.0]).is_err());
    drop(guard);

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (55, 3));
    assert!(rx.try_recv().is_err());
}

#[test]
fn unsubscribe_stops_delivery() {
    let port = Port::new(PortConfig::new("cancel", 1), ReadinessGate::opened()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let sub = port.subscribe_fn::<i32, _>(SubscriptionFilter::any(), move |_u: &Update<'_, i32>| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let mut guard = port.lock().unwrap();
    let id = guard.create_param("N", ParamType::Integer32).unwrap();
    guard.set_integer(0, id, 1).unwrap();
    guard.dispatch(0).unwrap();

    assert!(port.unsubscribe(sub));
    guard.set_integer(0, id, 2).unwrap();
    guard.dispatch(0).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_writers_serialize_on_the_port_lock() {
    let port = Arc::new(Port::new(PortConfig::new("writers", 1), ReadinessGate::opened()).unwrap());
    let id = port.lock().unwrap().create_param("N", ParamType::Integer32).unwrap();

    let (tx, rx) = bounded(1024);
    port.subscribe_fn::<i32, _>(SubscriptionFilter::slot(id), move |u: &Update<'_, i32>| {
        let _ = tx.try_send(*u.value);
    });

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                for i in 0..50 {
                    let mut guard = port.lock().unwrap();
                    guard.set_integer(0, id, w * 1000 + i).unwrap();
                    guard.update_timestamp();
                    guard.dispatch(0).unwrap();
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    // Every write changed the value, so every pass delivered exactly once.
    let delivered: Vec<i32> = rx.try_iter().collect();
    assert_eq!(delivered.len(), 200);
    let last = port.lock().unwrap().get_integer(0, id).unwrap();
    assert_eq!(delivered.last(), Some(&last));
}
