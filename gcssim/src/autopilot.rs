//! Simulated vehicle autopilot
//!
//! Answers the command and mission protocols the way a flight controller
//! does, with knobs for the awkward behaviours a ground station must
//! survive: out-of-order and repeated item requests, full storage, stalls,
//! refused commands and lost frames.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use gcslibgs::{
    CommandAck, CommandLong, Frame, GcsResult, Heartbeat, MavMissionResult, MavResult, Message,
    MissionAck, MissionCount, MissionCurrent, MissionItem, MissionItemInt, MissionRequestInt,
    MissionSignature, MissionType, PeerIdentity,
};
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Order in which the simulator asks for uploaded items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOrder {
    #[default]
    Sequential,
    Reverse,
    /// Random permutation drawn from the seeded generator
    Shuffled,
    /// Every index asked for twice in a row
    Duplicated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub system_id: u8,
    pub component_id: u8,
    /// Address the UDP server binds to
    pub listen_addr: String,
    /// Where heartbeats go until the ground station is heard from
    pub ground_addr: String,
    pub heartbeat_interval_ms: u64,
    pub request_order: RequestOrder,
    /// Largest list the vehicle accepts
    pub capacity: u16,
    /// Stop asking for items after this many requests
    pub stall_after: Option<usize>,
    /// Ack result per command code; anything else is accepted
    pub command_results: HashMap<u16, MavResult>,
    /// Commands that get no answer at all
    pub ignored_commands: Vec<u16>,
    /// Probability of losing an inbound frame
    pub drop_rate: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            system_id: 1,
            component_id: 1,
            listen_addr: "127.0.0.1:14540".to_string(),
            ground_addr: "127.0.0.1:14550".to_string(),
            heartbeat_interval_ms: 1000,
            request_order: RequestOrder::Sequential,
            capacity: 700,
            stall_after: None,
            command_results: HashMap::new(),
            ignored_commands: Vec::new(),
            drop_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GcsResult<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.system_id, self.component_id)
    }
}

struct IncomingUpload {
    ground: PeerIdentity,
    mission_type: MissionType,
    items: Vec<Option<MissionItem>>,
    /// Requests still to make, in order
    plan: VecDeque<u16>,
    requests_made: usize,
}

impl IncomingUpload {
    fn is_complete(&self) -> bool {
        self.items.iter().all(Option::is_some)
    }

    fn first_missing(&self) -> Option<u16> {
        self.items.iter().position(Option::is_none).map(|i| i as u16)
    }
}

pub struct SimAutopilot {
    config: SimConfig,
    identity: PeerIdentity,
    rng: StdRng,
    missions: HashMap<MissionType, Vec<MissionItem>>,
    upload: Option<IncomingUpload>,
    /// Last finished upload, so a repeated final item gets its ack again
    completed: Option<(PeerIdentity, MissionType)>,
    commands_received: HashMap<u16, usize>,
    frames_dropped: usize,
}

impl SimAutopilot {
    pub fn new(config: SimConfig) -> Self {
        Self {
            identity: config.identity(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            missions: HashMap::new(),
            upload: None,
            completed: None,
            commands_received: HashMap::new(),
            frames_dropped: 0,
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn set_stall_after(&mut self, stall_after: Option<usize>) {
        self.config.stall_after = stall_after;
    }

    pub fn set_drop_rate(&mut self, drop_rate: f64) {
        self.config.drop_rate = drop_rate;
    }

    pub fn set_request_order(&mut self, order: RequestOrder) {
        self.config.request_order = order;
    }

    pub fn mission(&self, mission_type: MissionType) -> &[MissionItem] {
        self.missions
            .get(&mission_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace a list as if another ground station had uploaded it
    pub fn set_mission_externally(&mut self, mission_type: MissionType, items: Vec<MissionItem>) {
        info!("Mission {:?} replaced out of band ({} items)", mission_type, items.len());
        self.missions.insert(mission_type, items);
    }

    pub fn commands_received(&self, command: u16) -> usize {
        self.commands_received.get(&command).copied().unwrap_or(0)
    }

    pub fn frames_dropped(&self) -> usize {
        self.frames_dropped
    }

    pub fn heartbeat(&self) -> Frame {
        Frame::new(self.identity, Message::Heartbeat(Heartbeat::autopilot()))
    }

    /// MISSION_CURRENT advertising the stored mission
    pub fn mission_current(&self) -> Frame {
        let signature = MissionSignature::of(self.mission(MissionType::Mission));
        Frame::new(
            self.identity,
            Message::MissionCurrent(MissionCurrent {
                seq: 0,
                total: signature.count,
                mission_id: signature.checksum,
            }),
        )
    }

    /// Process one frame from the ground and return the replies
    pub fn handle(&mut self, frame: Frame) -> Vec<Frame> {
        if self.config.drop_rate > 0.0 && self.rng.gen::<f64>() < self.config.drop_rate {
            trace!("Dropping {:?}", frame.message_type());
            self.frames_dropped += 1;
            return Vec::new();
        }
        match frame.message.target() {
            Some(target) if self.identity.is_addressed_by(target) => {}
            _ => return Vec::new(),
        }

        let ground = frame.sender;
        let replies = match frame.message {
            Message::CommandLong(command) => self.handle_command(ground, &command),
            Message::MissionCount(count) => self.handle_count(ground, &count),
            Message::MissionItemInt(item) => self.handle_item(ground, item.item),
            Message::MissionRequestList(request) => {
                let count = self.mission(request.mission_type).len() as u16;
                vec![Message::MissionCount(MissionCount {
                    target: ground,
                    count,
                    mission_type: request.mission_type,
                })]
            }
            Message::MissionRequestInt(request) => self.handle_request(ground, &request),
            Message::MissionClearAll(clear) => {
                info!("Clearing {:?}", clear.mission_type);
                self.missions.remove(&clear.mission_type);
                if self.upload.as_ref().map(|u| u.mission_type) == Some(clear.mission_type) {
                    self.upload = None;
                }
                vec![ack(ground, MavMissionResult::Accepted, clear.mission_type)]
            }
            Message::MissionAck(mission_ack) => {
                debug!("Ground acknowledged transfer: {:?}", mission_ack.result);
                if mission_ack.result == MavMissionResult::OperationCancelled {
                    self.upload = None;
                }
                Vec::new()
            }
            Message::Heartbeat(_) | Message::MissionCurrent(_) | Message::CommandAck(_) => Vec::new(),
        };

        replies
            .into_iter()
            .map(|message| Frame::new(self.identity, message))
            .collect()
    }

    fn handle_command(&mut self, ground: PeerIdentity, command: &CommandLong) -> Vec<Message> {
        *self.commands_received.entry(command.command).or_insert(0) += 1;
        if self.config.ignored_commands.contains(&command.command) {
            debug!("Ignoring command {}", command.command);
            return Vec::new();
        }

        let result = self
            .config
            .command_results
            .get(&command.command)
            .copied()
            .unwrap_or(MavResult::Accepted);
        debug!(
            "Command {} (confirmation {}): {:?}",
            command.command, command.confirmation, result
        );
        vec![Message::CommandAck(CommandAck {
            target: ground,
            command: command.command,
            result,
            progress: 0,
        })]
    }

    fn handle_count(&mut self, ground: PeerIdentity, count: &MissionCount) -> Vec<Message> {
        if count.count > self.config.capacity {
            warn!("Refusing {} items, capacity is {}", count.count, self.config.capacity);
            return vec![ack(ground, MavMissionResult::NoSpace, count.mission_type)];
        }
        if count.count == 0 {
            self.missions.insert(count.mission_type, Vec::new());
            return vec![ack(ground, MavMissionResult::Accepted, count.mission_type)];
        }

        let mut plan: Vec<u16> = (0..count.count).collect();
        match self.config.request_order {
            RequestOrder::Sequential => {}
            RequestOrder::Reverse => plan.reverse(),
            RequestOrder::Shuffled => plan.shuffle(&mut self.rng),
            RequestOrder::Duplicated => plan = plan.into_iter().flat_map(|seq| [seq, seq]).collect(),
        }

        info!("Receiving {} {:?} items", count.count, count.mission_type);
        self.completed = None;
        self.upload = Some(IncomingUpload {
            ground,
            mission_type: count.mission_type,
            items: vec![None; usize::from(count.count)],
            plan: plan.into(),
            requests_made: 0,
        });
        self.next_request().into_iter().collect()
    }

    fn handle_item(&mut self, ground: PeerIdentity, item: MissionItem) -> Vec<Message> {
        let upload = match self.upload.as_mut() {
            Some(upload) if upload.ground == ground && upload.mission_type == item.mission_type => upload,
            _ => {
                if self.completed == Some((ground, item.mission_type)) {
                    debug!("Repeated final item, acknowledging again");
                    return vec![ack(ground, MavMissionResult::Accepted, item.mission_type)];
                }
                return Vec::new();
            }
        };

        let index = usize::from(item.seq);
        if index >= upload.items.len() {
            let mission_type = upload.mission_type;
            self.upload = None;
            return vec![ack(ground, MavMissionResult::InvalidSequence, mission_type)];
        }
        upload.items[index] = Some(item);

        if let Some(request) = self.next_request() {
            return vec![request];
        }
        if self.upload.as_ref().map(IncomingUpload::is_complete) == Some(true) {
            return self.finish_upload().into_iter().collect();
        }
        Vec::new()
    }

    fn handle_request(&mut self, ground: PeerIdentity, request: &MissionRequestInt) -> Vec<Message> {
        match self.mission(request.mission_type).get(usize::from(request.seq)) {
            Some(item) => vec![Message::MissionItemInt(MissionItemInt {
                target: ground,
                item: *item,
            })],
            None => vec![ack(ground, MavMissionResult::InvalidSequence, request.mission_type)],
        }
    }

    /// Next item request of the running upload, if it should ask for one
    fn next_request(&mut self) -> Option<Message> {
        let stall_after = self.config.stall_after;
        let upload = self.upload.as_mut()?;
        if stall_after.map_or(false, |limit| upload.requests_made >= limit) {
            debug!("Stalling after {} requests", upload.requests_made);
            return None;
        }

        let seq = match upload.plan.pop_front() {
            Some(seq) => seq,
            None => upload.first_missing()?,
        };
        upload.requests_made += 1;
        Some(Message::MissionRequestInt(MissionRequestInt {
            target: upload.ground,
            seq,
            mission_type: upload.mission_type,
        }))
    }

    fn finish_upload(&mut self) -> Option<Message> {
        let upload = self.upload.take()?;
        let items: Vec<MissionItem> = upload.items.into_iter().flatten().collect();
        info!("Stored {} {:?} items", items.len(), upload.mission_type);
        self.missions.insert(upload.mission_type, items);
        self.completed = Some((upload.ground, upload.mission_type));
        Some(ack(upload.ground, MavMissionResult::Accepted, upload.mission_type))
    }
}

fn ack(target: PeerIdentity, result: MavMissionResult, mission_type: MissionType) -> Message {
    Message::MissionAck(MissionAck {
        target,
        result,
        mission_type,
    })
}
