//! Protocol engine
//!
//! Single owner of all protocol state. The engine never looks at the clock
//! or sleeps; the caller passes `now` into every call. `GcsClient` runs it on
//! the dispatch thread, tests drive it directly.

use std::sync::Arc;
use std::time::Instant;

use gcslibgs::{Frame, Message, MessageType, MissionItem, MissionSignature, MissionType, Outcome, PeerIdentity};
use log::{debug, trace};

use crate::command::{CommandProtocol, ResultCallback, VehicleCommand};
use crate::config::EngineConfig;
use crate::link::Link;
use crate::mission::{DownloadCallback, MissionProtocol, UploadState};
use crate::notify::MissionChangedCallback;
use crate::system::{MessageHandler, PeerStatus, SystemHandle};
use crate::timer::{TimerKey, TimerQueue};

/// What a protocol handler may touch besides its own state
pub struct Context<'a> {
    pub system: &'a mut SystemHandle,
    pub timers: &'a mut TimerQueue,
    pub now: Instant,
}

/// Work submitted to the dispatch context
pub enum Request {
    Execute {
        command: VehicleCommand,
        callback: ResultCallback,
    },
    Upload {
        mission_type: MissionType,
        items: Vec<MissionItem>,
        callback: ResultCallback,
    },
    Download {
        mission_type: MissionType,
        callback: DownloadCallback,
    },
    Clear {
        mission_type: MissionType,
        callback: ResultCallback,
    },
    CancelTransfer,
    SubscribeMissionChanged(MissionChangedCallback),
    Subscribe {
        message_type: MessageType,
        handler: MessageHandler,
    },
}

impl Request {
    /// Resolve without running; subscriptions are simply dropped
    pub fn reject(self, outcome: Outcome) {
        match self {
            Request::Execute { callback, .. }
            | Request::Upload { callback, .. }
            | Request::Clear { callback, .. } => callback(outcome),
            Request::Download { callback, .. } => callback(outcome, Vec::new()),
            Request::CancelTransfer
            | Request::SubscribeMissionChanged(_)
            | Request::Subscribe { .. } => {}
        }
    }
}

pub struct Engine {
    system: SystemHandle,
    timers: TimerQueue,
    commands: CommandProtocol,
    missions: MissionProtocol,
}

impl Engine {
    pub fn new(config: EngineConfig, link: Arc<dyn Link>) -> Self {
        Self {
            system: SystemHandle::new(config.own_identity, link),
            timers: TimerQueue::new(),
            commands: CommandProtocol::new(config.command),
            missions: MissionProtocol::new(config.mission),
        }
    }

    pub fn status(&self) -> Arc<PeerStatus> {
        self.system.status()
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.system.peer()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.pending_count()
    }

    pub fn transfer_active(&self, peer: PeerIdentity) -> bool {
        self.missions.is_active(peer)
    }

    pub fn upload_state(&self, peer: PeerIdentity) -> Option<UploadState> {
        self.missions.upload_state(peer)
    }

    /// Signature of the mission believed to be on the vehicle
    pub fn signature(&self) -> Option<MissionSignature> {
        self.missions.signature()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Process one inbound frame
    pub fn handle_frame(&mut self, frame: Frame, now: Instant) {
        if let Message::Heartbeat(heartbeat) = &frame.message {
            self.system.observe_heartbeat(frame.sender, heartbeat);
        }
        if !self.system.accepts(&frame) {
            trace!("Dropping {:?} from {}", frame.message_type(), frame.sender);
            return;
        }

        let mut ctx = Context {
            system: &mut self.system,
            timers: &mut self.timers,
            now,
        };
        let sender = frame.sender;
        match &frame.message {
            Message::CommandAck(ack) => self.commands.handle_ack(&mut ctx, sender, ack),
            Message::MissionRequestInt(request) => self.missions.handle_request(&mut ctx, sender, request),
            Message::MissionCount(count) => self.missions.handle_count(&mut ctx, sender, count),
            Message::MissionItemInt(item) => self.missions.handle_item(&mut ctx, sender, item),
            Message::MissionAck(ack) => self.missions.handle_ack(&mut ctx, sender, ack),
            Message::MissionCurrent(current) => self.missions.handle_current(current),
            Message::Heartbeat(_)
            | Message::MissionRequestList(_)
            | Message::MissionClearAll(_)
            | Message::CommandLong(_) => {}
        }

        self.system.notify_subscribers(&frame);
    }

    /// Run every timer that has expired by `now`, earliest first
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(key) = self.timers.pop_due(now) {
            let mut ctx = Context {
                system: &mut self.system,
                timers: &mut self.timers,
                now,
            };
            match key {
                TimerKey::Command { peer, command } => self.commands.handle_timeout(&mut ctx, peer, command),
                TimerKey::Transfer(peer) => self.missions.handle_timeout(&mut ctx, peer),
            }
        }
    }

    pub fn submit(&mut self, request: Request, now: Instant) {
        let mut ctx = Context {
            system: &mut self.system,
            timers: &mut self.timers,
            now,
        };
        match request {
            Request::Execute { command, callback } => self.commands.execute(&mut ctx, command, callback),
            Request::Upload {
                mission_type,
                items,
                callback,
            } => self.missions.upload(&mut ctx, mission_type, items, callback),
            Request::Download { mission_type, callback } => self.missions.download(&mut ctx, mission_type, callback),
            Request::Clear { mission_type, callback } => self.missions.clear(&mut ctx, mission_type, callback),
            Request::CancelTransfer => {
                if !self.missions.cancel(&mut ctx) {
                    debug!("No mission transfer to cancel");
                }
            }
            Request::SubscribeMissionChanged(callback) => self.missions.subscribe_changed(callback),
            Request::Subscribe { message_type, handler } => ctx.system.subscribe(message_type, handler),
        }
    }

    /// Resolve everything outstanding with `Cancelled`
    pub fn shutdown(&mut self, now: Instant) {
        let mut ctx = Context {
            system: &mut self.system,
            timers: &mut self.timers,
            now,
        };
        self.commands.cancel_all(&mut ctx);
        self.missions.cancel_all(&mut ctx);
    }
}


#[cfg(test)]
mod tests {
    use super::harness::{capture, Harness, VEHICLE};
    use super::*;
    use gcslibgs::{CommandAck, Heartbeat, MavResult};
    use std::sync::Mutex;

    #[test]
    fn test_frames_from_strangers_are_dropped() {
        let mut harness = Harness::connected();
        let (callback, result) = capture();
        harness.submit(Request::Execute {
            command: VehicleCommand::arm(),
            callback,
        });

        let stranger = Frame::new(
            PeerIdentity::new(9, 1),
            Message::CommandAck(CommandAck {
                target: Harness::gcs(),
                command: 400,
                result: MavResult::Accepted,
                progress: 0,
            }),
        );
        harness.engine.handle_frame(stranger, harness.now);
        assert_eq!(result.get(), None);
        assert_eq!(harness.engine.peer(), Some(VEHICLE));
    }

    #[test]
    fn test_subscribers_see_vehicle_frames() {
        let mut harness = Harness::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        harness.submit(Request::Subscribe {
            message_type: MessageType::Heartbeat,
            handler: Box::new(move |_| *counter.lock().unwrap() += 1),
        });

        harness.deliver(Message::Heartbeat(Heartbeat::autopilot()));
        harness.deliver(Message::Heartbeat(Heartbeat::autopilot()));
        assert_eq!(*seen.lock().unwrap(), 2);
        assert!(harness.engine.status().has_autopilot());
    }

    #[test]
    fn test_reject() {
        let (callback, result) = capture();
        Request::Clear {
            mission_type: MissionType::Fence,
            callback,
        }
        .reject(Outcome::ConnectionError);
        assert_eq!(result.get(), Some(Outcome::ConnectionError));
        Request::CancelTransfer.reject(Outcome::ConnectionError);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut harness = Harness::connected();
        let (first, first_result) = capture();
        harness.submit(Request::Execute {
            command: VehicleCommand::arm(),
            callback: first,
        });
        harness.now += Harness::TIMEOUT / 2;
        let (second, second_result) = capture();
        harness.submit(Request::Execute {
            command: VehicleCommand::land(),
            callback: second,
        });

        assert_eq!(harness.engine.next_deadline(), Some(harness.now + Harness::TIMEOUT / 2));
        harness.advance(Harness::TIMEOUT);
        assert_eq!(harness.engine.pending_commands(), 2);
        for _ in 0..3 {
            harness.advance(Harness::TIMEOUT);
        }
        assert_eq!(first_result.get(), Some(Outcome::Timeout));
        assert_eq!(second_result.get(), Some(Outcome::Timeout));
        assert_eq!(harness.engine.next_deadline(), None);
    }
}
