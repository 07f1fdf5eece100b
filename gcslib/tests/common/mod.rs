//! Wiring shared by the integration tests: a client and a simulated
//! autopilot joined by in-process channels.

#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gcslib::{ChannelLink, EngineConfig, GcsClient, MissionItem, RetryPolicy};
use gcssim::{lock, SimAutopilot, SimConfig, SimRunner};

pub const TIMEOUT: Duration = Duration::from_millis(100);

pub struct Rig {
    pub client: GcsClient,
    pub sim: SimRunner,
}

impl Rig {
    pub fn autopilot(&self) -> Arc<Mutex<SimAutopilot>> {
        self.sim.autopilot()
    }

    pub fn with_autopilot<R>(&self, f: impl FnOnce(&mut SimAutopilot) -> R) -> R {
        let autopilot = self.sim.autopilot();
        let mut guard: MutexGuard<'_, SimAutopilot> = lock(&autopilot);
        f(&mut guard)
    }
}

pub fn test_config(retries: u32) -> EngineConfig {
    let policy = RetryPolicy::new(TIMEOUT, retries);
    EngineConfig {
        command: policy,
        mission: policy,
        ..EngineConfig::default()
    }
}

pub fn rig(sim_config: SimConfig) -> Rig {
    rig_with(test_config(3), sim_config)
}

pub fn rig_with(config: EngineConfig, sim_config: SimConfig) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let (to_vehicle, vehicle_inbound) = mpsc::channel();
    let client = GcsClient::new(config, Arc::new(ChannelLink::new(to_vehicle))).unwrap();
    let sink = client.inbound();
    let sim_config = SimConfig {
        heartbeat_interval_ms: 50,
        ..sim_config
    };
    let sim = SimRunner::start(SimAutopilot::new(sim_config), vehicle_inbound, move |frame| {
        sink.deliver(frame)
    })
    .unwrap();

    assert!(client.wait_for_autopilot(Duration::from_secs(2)));
    Rig { client, sim }
}

/// Two waypoints, each followed by a speed change
pub fn scenario() -> Vec<MissionItem> {
    vec![
        MissionItem::waypoint(0, 47.398170, 8.545649, 5.0).with_current(true),
        MissionItem::change_speed(1, 4.0),
        MissionItem::waypoint(2, 47.398175, 8.545654, 7.5),
        MissionItem::change_speed(3, 5.0),
    ]
}

/// Mission-changed notifications seen so far
pub fn watch_changes(client: &GcsClient) -> Arc<Mutex<Vec<gcslib::MissionSignature>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.subscribe_mission_changed(move |signature| sink.lock().unwrap().push(signature));
    seen
}
