//! Routing invariants of the hub, driven one poll at a time.

use std::collections::BTreeSet;

use contracts::{OperatingMode, SensorEvent, SensorHandle, SensorType, VirtualSensorConfig, VirtualSensorKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensor_hub::{EventConnectionHandle, HubError, SensorHub};

use crate::support::*;

fn assert_records_match_subscriptions(hub: &SensorHub, conns: &[EventConnectionHandle], handles: &[SensorHandle]) {
    for &handle in handles {
        let subscribed = conns.iter().any(|c| c.connection().has_sensor(handle));
        assert_eq!(
            hub.is_active(handle),
            subscribed,
            "record for {handle} does not match subscriptions"
        );
    }
}

#[tokio::test]
async fn test_active_record_exists_iff_subscribed() {
    let device = device();
    let hub = hub(&device);
    let handles = [ACCEL, GYRO, LIGHT, PROX];
    let mut conns: Vec<EventConnectionHandle> = (0..3).map(|_| connect(&hub, APP)).collect();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..300 {
        let slot = rng.random_range(0..conns.len());
        let handle = handles[rng.random_range(0..handles.len())];
        match rng.random_range(0..10) {
            0..=4 => {
                let period = rng.random_range(0..50_000_000);
                hub.enable(&conns[slot], handle, period, 0).unwrap();
            }
            5..=8 => {
                let subscribed = conns[slot].connection().has_sensor(handle);
                let result = hub.disable(&conns[slot], handle);
                assert_eq!(result.is_ok(), subscribed);
            }
            _ => {
                // dropping the handle destroys the connection
                conns[slot] = connect(&hub, APP);
            }
        }
        assert_records_match_subscriptions(&hub, &conns, &handles);
    }

    let active: BTreeSet<SensorHandle> = handles.iter().copied().filter(|h| hub.is_active(*h)).collect();
    let enabled: BTreeSet<SensorHandle> = device.enabled_handles().into_iter().collect();
    assert_eq!(active, enabled);
}

#[tokio::test]
async fn test_flush_completions_attributed_fifo() {
    let device = device();
    let hub = hub(&device);
    let mut first = connect(&hub, APP);
    let mut second = connect(&hub, APP);
    hub.enable(&first, LIGHT, 0, 0).unwrap();
    hub.enable(&second, LIGHT, 0, 0).unwrap();

    hub.flush(&first).unwrap();
    hub.flush(&second).unwrap();

    device.push_batch(vec![SensorEvent::flush_complete(LIGHT, 10)]);
    hub.poll_once().unwrap();
    let got = first.drain();
    assert_eq!(got.len(), 1);
    assert!(got[0].is_flush_complete());
    assert!(second.drain().is_empty());

    device.push_batch(vec![SensorEvent::flush_complete(LIGHT, 11)]);
    hub.poll_once().unwrap();
    assert!(first.drain().is_empty());
    let got = second.drain();
    assert_eq!(got.len(), 1);
    assert!(got[0].is_flush_complete());
}

#[tokio::test]
async fn test_first_flush_queued_ahead_of_explicit_flush() {
    let device = device();
    let hub = hub(&device);
    let mut first = connect(&hub, APP);
    let mut second = connect(&hub, APP);
    hub.enable(&first, ACCEL, 0, 0).unwrap();
    // joins a running continuous sensor: a first flush is queued for `second`
    hub.enable(&second, ACCEL, 0, 0).unwrap();
    hub.flush(&first).unwrap();

    device.push_batch(vec![
        data(ACCEL, 1),
        SensorEvent::flush_complete(ACCEL, 2),
        data(ACCEL, 3),
        SensorEvent::flush_complete(ACCEL, 4),
    ]);
    hub.poll_once().unwrap();

    let got = first.drain();
    assert_eq!(timestamps(&got), vec![1, 3, 4]);
    assert!(got[2].is_flush_complete());
    assert_eq!(timestamps(&second.drain()), vec![3]);
}

#[tokio::test]
async fn test_delivery_sorted_with_virtual_events() {
    let device = device();
    let hub = SensorHub::builder(device.clone())
        .virtual_sensor(VirtualSensorConfig {
            handle: MAG,
            name: "accel magnitude".to_string(),
            sensor_type: SensorType::Vendor(100),
            sources: vec![ACCEL],
            kind: VirtualSensorKind::Magnitude,
            min_delay_us: 0,
        })
        .build()
        .unwrap();
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, MAG, 0, 0).unwrap();
    hub.enable(&conn, ACCEL, 0, 0).unwrap();
    hub.enable(&conn, LIGHT, 0, 0).unwrap();

    // arrival order is not timestamp order
    device.push_batch(vec![data(ACCEL, 30), data(LIGHT, 5), data(ACCEL, 10)]);
    assert_eq!(hub.poll_once().unwrap(), 3);

    let got = conn.drain();
    assert_eq!(timestamps(&got), vec![5, 10, 10, 30, 30]);
    let handles: Vec<SensorHandle> = got.iter().map(|e| e.sensor).collect();
    assert_eq!(handles, vec![LIGHT, ACCEL, MAG, ACCEL, MAG]);
    assert_eq!(got[2].values(), Some(&[10.0_f32][..]));
}

#[tokio::test]
async fn test_wake_lock_held_until_every_connection_acks() {
    let device = device();
    let hub = hub(&device);
    let mut a = connect(&hub, APP);
    let mut b = connect(&hub, APP);
    hub.enable(&a, PROX, 0, 0).unwrap();
    hub.enable(&b, TILT, 0, 0).unwrap();
    assert!(!hub.is_wake_lock_held());

    device.push_batch(vec![data(PROX, 1)]);
    hub.poll_once().unwrap();
    let got = a.drain();
    assert_eq!(got.len(), 1);
    assert!(got[0].wake_up_ack_required);
    assert!(hub.is_wake_lock_held());

    device.push_batch(vec![data(TILT, 2)]);
    hub.poll_once().unwrap();
    assert_eq!(b.drain().len(), 1);

    hub.acknowledge_wake_events(&a, 1);
    assert!(hub.is_wake_lock_held(), "released while b still owes an ack");
    assert_eq!(b.connection().wake_lock_ref_count(), 1);

    hub.acknowledge_wake_events(&b, 1);
    assert!(!hub.is_wake_lock_held());
    assert_eq!(device.wake_acks(), vec![1, 1]);
}

#[tokio::test]
async fn test_wake_event_without_subscriber_does_not_hold_lock() {
    let device = device();
    let hub = hub(&device);
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, LIGHT, 0, 0).unwrap();

    device.push_batch(vec![data(PROX, 1), data(LIGHT, 2)]);
    hub.poll_once().unwrap();

    assert_eq!(conn.drain().len(), 1);
    assert!(!hub.is_wake_lock_held());
    assert_eq!(device.wake_acks(), vec![1]);
}

#[tokio::test]
async fn test_restricted_to_injection_rejected() {
    let device = device();
    let hub = hub(&device);
    hub.change_mode(OperatingMode::Restricted, Some(TOOL)).unwrap();

    let result = hub.change_mode(OperatingMode::DataInjection, Some(TOOL));
    assert!(matches!(result, Err(HubError::InvalidOperation(_))));
    assert_eq!(hub.mode(), OperatingMode::Restricted);
    assert_eq!(result.unwrap_err().status(), sensor_hub::Status::InvalidOperation);
}

#[tokio::test]
async fn test_one_shot_delivers_once_then_disables() {
    let device = device();
    let hub = hub(&device);
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, SIG_MOTION, 0, 0).unwrap();
    assert!(device.enabled_handles().contains(&SIG_MOTION));

    device.push_batch(vec![data(SIG_MOTION, 1), data(SIG_MOTION, 2)]);
    hub.poll_once().unwrap();

    let got = conn.drain();
    assert_eq!(timestamps(&got), vec![1]);
    assert!(!conn.connection().has_sensor(SIG_MOTION));
    assert!(!hub.is_active(SIG_MOTION));

    device.push_batch(vec![data(SIG_MOTION, 3)]);
    hub.poll_once().unwrap();
    assert!(conn.drain().is_empty());

    // the delivered event was wake-up class and still needs its ack
    assert!(hub.is_wake_lock_held());
    hub.acknowledge_wake_events(&conn, 1);
    assert!(!hub.is_wake_lock_held());
}

#[tokio::test]
async fn test_one_shot_can_be_rearmed() {
    let device = device();
    let hub = hub(&device);
    let mut conn = connect(&hub, APP);

    hub.enable(&conn, SIG_MOTION, 0, 0).unwrap();
    device.push_batch(vec![data(SIG_MOTION, 1)]);
    hub.poll_once().unwrap();
    hub.acknowledge_wake_events(&conn, 1);

    hub.enable(&conn, SIG_MOTION, 0, 0).unwrap();
    device.push_batch(vec![data(SIG_MOTION, 2)]);
    hub.poll_once().unwrap();
    assert_eq!(timestamps(&conn.drain()), vec![1, 2]);
}

#[tokio::test]
async fn test_destroyed_connection_stays_valid_for_holders() {
    let device = device();
    let hub = hub(&device);
    let mut survivor = connect(&hub, APP);
    let doomed = connect(&hub, APP);
    hub.enable(&survivor, LIGHT, 0, 0).unwrap();
    hub.enable(&doomed, LIGHT, 0, 0).unwrap();

    // a strong reference outlives the client handle, as a dispatch snapshot would
    let held = doomed.connection().clone();
    let doomed_id = doomed.id();
    drop(doomed);

    assert!(!held.has_any_sensor());
    assert!(held.is_closed());
    assert!(hub.is_active(LIGHT));

    device.push_batch(vec![data(LIGHT, 1)]);
    hub.poll_once().unwrap();
    assert_eq!(survivor.drain().len(), 1);
    assert_eq!(held.metrics().delivered, 0);

    let snapshot = hub.snapshot();
    assert_eq!(snapshot.connections.len(), 1);
    assert!(snapshot.connections.iter().all(|c| c.id != doomed_id));

    hub.disable(&survivor, LIGHT).unwrap();
    assert!(!hub.is_active(LIGHT));
}

#[tokio::test]
async fn test_on_change_subscriber_gets_cached_value() {
    let device = device();
    let hub = hub(&device);
    let mut first = connect(&hub, APP);
    hub.enable(&first, LIGHT, 0, 0).unwrap();

    device.push_batch(vec![SensorEvent::data(LIGHT, 7, vec![250.0])]);
    hub.poll_once().unwrap();
    assert_eq!(first.drain().len(), 1);

    let mut late = connect(&hub, APP);
    hub.enable(&late, LIGHT, 0, 0).unwrap();
    let got = late.drain();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].timestamp, 7);
    assert_eq!(got[0].values(), Some(&[250.0_f32][..]));

    // re-enabling an existing subscription does not replay the value
    hub.enable(&late, LIGHT, 0, 0).unwrap();
    assert!(late.drain().is_empty());
    assert!(first.drain().is_empty());
}

#[tokio::test]
async fn test_stale_cache_not_replayed_after_reactivation() {
    let device = device();
    let hub = hub(&device);
    let first = connect(&hub, APP);
    hub.enable(&first, LIGHT, 0, 0).unwrap();
    device.push_batch(vec![data(LIGHT, 1)]);
    hub.poll_once().unwrap();
    hub.disable(&first, LIGHT).unwrap();

    let mut second = connect(&hub, APP);
    hub.enable(&second, LIGHT, 0, 0).unwrap();
    let mut third = connect(&hub, APP);
    hub.enable(&third, LIGHT, 0, 0).unwrap();

    assert!(second.drain().is_empty());
    assert!(third.drain().is_empty());
    assert_eq!(hub.last_event(LIGHT).map(|e| e.timestamp), Some(1));
}
