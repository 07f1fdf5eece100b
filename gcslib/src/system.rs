//! System handle for the vehicle on the other end of the link
//!
//! Owned by the dispatch context. It learns the vehicle identity from the
//! first autopilot heartbeat, filters inbound frames down to that vehicle,
//! sends on behalf of the protocols and fans frames out to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gcslibgs::{Frame, GcsResult, Heartbeat, Message, MessageType, PeerIdentity};
use log::{info, trace};

use crate::link::Link;

/// Handler for inbound frames of one message type
pub type MessageHandler = Box<dyn FnMut(&Frame) + Send>;

/// Connection flags readable from any thread
#[derive(Debug, Default)]
pub struct PeerStatus {
    connected: AtomicBool,
    autopilot: AtomicBool,
    identity: Mutex<Option<PeerIdentity>>,
}

impl PeerStatus {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn has_autopilot(&self) -> bool {
        self.autopilot.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> Option<PeerIdentity> {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The vehicle as seen from the dispatch context
pub struct SystemHandle {
    own: PeerIdentity,
    link: Arc<dyn Link>,
    peer: Option<PeerIdentity>,
    status: Arc<PeerStatus>,
    subscriptions: HashMap<MessageType, Vec<MessageHandler>>,
}

impl SystemHandle {
    pub fn new(own: PeerIdentity, link: Arc<dyn Link>) -> Self {
        Self {
            own,
            link,
            peer: None,
            status: Arc::new(PeerStatus::default()),
            subscriptions: HashMap::new(),
        }
    }

    pub fn own_identity(&self) -> PeerIdentity {
        self.own
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.peer
    }

    pub fn status(&self) -> Arc<PeerStatus> {
        self.status.clone()
    }

    pub fn peer_connected(&self) -> bool {
        self.status.connected()
    }

    pub fn peer_has_autopilot(&self) -> bool {
        self.status.has_autopilot()
    }

    /// The vehicle to talk to, if it is connected and runs an autopilot
    pub fn target(&self) -> Option<PeerIdentity> {
        self.peer
            .filter(|_| self.peer_connected() && self.peer_has_autopilot())
    }

    /// Record a heartbeat; the first autopilot heartbeat fixes the peer
    pub fn observe_heartbeat(&mut self, sender: PeerIdentity, heartbeat: &Heartbeat) {
        match self.peer {
            None if heartbeat.has_autopilot() => {
                info!("Discovered vehicle {}", sender);
                self.peer = Some(sender);
                *self
                    .status
                    .identity
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(sender);
                self.status.autopilot.store(true, Ordering::SeqCst);
                self.status.connected.store(true, Ordering::SeqCst);
            }
            Some(peer) if peer == sender => {
                self.status.connected.store(true, Ordering::SeqCst);
            }
            _ => trace!("Ignoring heartbeat from {}", sender),
        }
    }

    /// Mark the link to the vehicle as lost or regained
    #[cfg(test)]
    pub(crate) fn set_connected(&mut self, connected: bool) {
        if self.peer.is_some() {
            log::debug!("Vehicle connected: {}", connected);
            self.status.connected.store(connected, Ordering::SeqCst);
        }
    }

    /// Whether a frame comes from the vehicle and is addressed to us
    pub fn accepts(&self, frame: &Frame) -> bool {
        if self.peer != Some(frame.sender) {
            return false;
        }
        match frame.message.target() {
            Some(target) => self.own.is_addressed_by(target),
            None => true,
        }
    }

    pub fn subscribe(&mut self, message_type: MessageType, handler: MessageHandler) {
        self.subscriptions
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// Run subscribers of the frame's message type
    pub fn notify_subscribers(&mut self, frame: &Frame) {
        if let Some(handlers) = self.subscriptions.get_mut(&frame.message_type()) {
            for handler in handlers.iter_mut() {
                handler(frame);
            }
        }
    }

    /// Send a message to the vehicle
    pub fn send(&self, message: Message) -> GcsResult<()> {
        trace!("Sending {:?}", message.message_type());
        self.link.send(&Frame::new(self.own, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ChannelLink;
    use gcslibgs::{CommandAck, MavResult, MAV_AUTOPILOT_INVALID};
    use std::sync::mpsc;

    const GCS: PeerIdentity = PeerIdentity::new(245, 190);
    const VEHICLE: PeerIdentity = PeerIdentity::new(1, 1);

    fn system() -> (SystemHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        (SystemHandle::new(GCS, Arc::new(ChannelLink::new(tx))), rx)
    }

    fn ack_to(target: PeerIdentity) -> Frame {
        Frame::new(
            VEHICLE,
            Message::CommandAck(CommandAck {
                target,
                command: 400,
                result: MavResult::Accepted,
                progress: 0,
            }),
        )
    }

    #[test]
    fn test_discovery_from_autopilot_heartbeat() {
        let (mut system, _rx) = system();
        assert_eq!(system.target(), None);

        let gcs_heartbeat = Heartbeat {
            autopilot: MAV_AUTOPILOT_INVALID,
        };
        system.observe_heartbeat(PeerIdentity::new(255, 0), &gcs_heartbeat);
        assert_eq!(system.peer(), None);

        system.observe_heartbeat(VEHICLE, &Heartbeat::autopilot());
        assert_eq!(system.target(), Some(VEHICLE));
        assert_eq!(system.status().identity(), Some(VEHICLE));

        system.observe_heartbeat(PeerIdentity::new(2, 1), &Heartbeat::autopilot());
        assert_eq!(system.peer(), Some(VEHICLE));

        system.set_connected(false);
        assert_eq!(system.target(), None);
    }

    #[test]
    fn test_filters_by_peer_and_target() {
        let (mut system, _rx) = system();
        system.observe_heartbeat(VEHICLE, &Heartbeat::autopilot());

        assert!(system.accepts(&ack_to(GCS)));
        assert!(system.accepts(&ack_to(PeerIdentity::new(0, 0))));
        assert!(!system.accepts(&ack_to(PeerIdentity::new(246, 190))));

        let mut stranger = ack_to(GCS);
        stranger.sender = PeerIdentity::new(7, 1);
        assert!(!system.accepts(&stranger));
    }

    #[test]
    fn test_subscribers_by_type() {
        let (mut system, _rx) = system();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        system.subscribe(
            MessageType::CommandAck,
            Box::new(move |_| *counter.lock().unwrap() += 1),
        );

        system.notify_subscribers(&ack_to(GCS));
        system.notify_subscribers(&Frame::new(VEHICLE, Message::Heartbeat(Heartbeat::autopilot())));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_send_stamps_own_identity() {
        let (system, rx) = system();
        system
            .send(Message::Heartbeat(Heartbeat {
                autopilot: MAV_AUTOPILOT_INVALID,
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().sender, GCS);
    }
}
