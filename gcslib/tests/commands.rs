//! Command protocol against the simulated autopilot

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{rig, test_config, TIMEOUT};
use gcslib::{
    ChannelLink, Frame, GcsClient, MavResult, MessageType, Outcome, VehicleCommand,
    MAV_CMD_COMPONENT_ARM_DISARM, MAV_CMD_NAV_LAND, MAV_CMD_NAV_RETURN_TO_LAUNCH,
    MAV_CMD_NAV_TAKEOFF,
};
use gcssim::SimConfig;

#[test]
fn test_accepted() {
    let rig = rig(SimConfig::default());
    assert!(rig.client.peer_connected());
    assert!(rig.client.peer_has_autopilot());

    assert_eq!(rig.client.execute(VehicleCommand::arm()), Outcome::Success);
    assert_eq!(rig.client.execute(VehicleCommand::takeoff(10.0)), Outcome::Success);
    assert_eq!(
        rig.with_autopilot(|sim| sim.commands_received(MAV_CMD_NAV_TAKEOFF)),
        1
    );
}

#[test]
fn test_denied() {
    let mut config = SimConfig::default();
    config
        .command_results
        .insert(MAV_CMD_COMPONENT_ARM_DISARM, MavResult::Denied);
    config
        .command_results
        .insert(MAV_CMD_NAV_LAND, MavResult::TemporarilyRejected);
    let rig = rig(config);

    assert_eq!(rig.client.execute(VehicleCommand::arm()), Outcome::CommandDenied);
    assert_eq!(rig.client.execute(VehicleCommand::land()), Outcome::Busy);
}

#[test]
fn test_timeout_after_retries() {
    let rig = rig(SimConfig {
        ignored_commands: vec![MAV_CMD_NAV_LAND],
        ..SimConfig::default()
    });

    let started = Instant::now();
    assert_eq!(rig.client.execute(VehicleCommand::land()), Outcome::Timeout);
    assert!(started.elapsed() >= TIMEOUT * 4);
    assert_eq!(rig.with_autopilot(|sim| sim.commands_received(MAV_CMD_NAV_LAND)), 4);
}

#[test]
fn test_duplicate_command_is_busy() {
    let rig = rig(SimConfig {
        ignored_commands: vec![MAV_CMD_NAV_LAND],
        ..SimConfig::default()
    });

    let (tx, rx) = mpsc::channel();
    rig.client.execute_async(VehicleCommand::land(), move |outcome| {
        let _ = tx.send(outcome);
    });
    assert_eq!(rig.client.execute(VehicleCommand::land()), Outcome::Busy);
    assert_eq!(rig.client.execute(VehicleCommand::arm()), Outcome::Success);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Outcome::Timeout);
}

#[test]
fn test_no_system() {
    let (tx, _rx) = mpsc::channel::<Frame>();
    let client = GcsClient::new(test_config(3), Arc::new(ChannelLink::new(tx))).unwrap();
    assert_eq!(client.execute(VehicleCommand::arm()), Outcome::NoSystem);
}

#[test]
fn test_every_call_resolves_once() {
    // The first RTL stays in flight so every later one collides with it.
    let rig = rig(SimConfig {
        ignored_commands: vec![MAV_CMD_NAV_RETURN_TO_LAUNCH],
        ..SimConfig::default()
    });
    let calls = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..5 {
        let calls = calls.clone();
        rig.client
            .execute_async(VehicleCommand::return_to_launch(), move |outcome| {
                calls.lock().unwrap().push(outcome)
            });
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while calls.lock().unwrap().len() < 5 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Nothing resolves twice after the retry budget runs out.
    std::thread::sleep(TIMEOUT * 2);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls.iter().filter(|o| **o == Outcome::Busy).count(), 4);
    assert_eq!(calls.last(), Some(&Outcome::Timeout));
}

#[test]
fn test_subscriber_sees_heartbeats() {
    let rig = rig(SimConfig::default());
    let (tx, rx) = mpsc::channel();
    rig.client.subscribe(MessageType::Heartbeat, move |frame| {
        let _ = tx.send(frame.sender);
    });
    let sender = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(sender, rig.with_autopilot(|sim| sim.identity()));
}
