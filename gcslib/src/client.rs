//! High-level client interface for gcslib
//!
//! `GcsClient` owns the dispatch thread that runs the protocol engine. Every
//! operation comes in two flavours: `*_async` takes a completion callback
//! and returns at once, the plain form blocks the calling thread until the
//! outcome is known. Callbacks run on the dispatch thread; calling a
//! blocking method from inside one deadlocks.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gcslibgs::{Frame, GcsError, GcsResult, MessageType, MissionItem, MissionSignature, MissionType, Outcome};
use log::{debug, info, warn};

use crate::bridge::wait_for;
use crate::command::VehicleCommand;
use crate::config::constants::PEER_POLL_INTERVAL;
use crate::config::{EngineConfig, UdpLinkConfig};
use crate::engine::{Engine, Request};
use crate::link::{Link, UdpLink};
use crate::system::PeerStatus;

/// Input to the dispatch thread
pub enum Event {
    Inbound(Frame),
    Request(Request),
    Shutdown,
}

/// Entry point for frames received from the vehicle
#[derive(Clone)]
pub struct InboundSink {
    events: Sender<Event>,
}

impl InboundSink {
    /// Queue a frame; false once the dispatch thread is gone
    pub fn deliver(&self, frame: Frame) -> bool {
        self.events.send(Event::Inbound(frame)).is_ok()
    }
}

pub struct GcsClient {
    events: Sender<Event>,
    accepting: Arc<Mutex<bool>>,
    status: Arc<PeerStatus>,
    dispatch: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl GcsClient {
    /// Start the engine on `link`; feed inbound frames through `inbound()`
    pub fn new(config: EngineConfig, link: Arc<dyn Link>) -> GcsResult<Self> {
        let engine = Engine::new(config, link);
        let status = engine.status();
        let (events, queue) = mpsc::channel();
        let accepting = Arc::new(Mutex::new(true));

        let gate = accepting.clone();
        let dispatch = thread::Builder::new()
            .name("gcs-dispatch".to_string())
            .spawn(move || dispatch_loop(engine, queue, gate))?;

        info!("GCS client started as {}", config.own_identity);
        Ok(Self {
            events,
            accepting,
            status,
            dispatch: Some(dispatch),
            receiver: None,
        })
    }

    /// Start the engine on a UDP link
    pub fn connect_udp(config: EngineConfig, link_config: UdpLinkConfig) -> GcsResult<Self> {
        let link = Arc::new(UdpLink::bind(link_config)?);
        let mut client = Self::new(config, link.clone())?;
        let sink = client.inbound();
        client.receiver = Some(link.spawn_receiver(move |frame| sink.deliver(frame))?);
        Ok(client)
    }

    pub fn inbound(&self) -> InboundSink {
        InboundSink {
            events: self.events.clone(),
        }
    }

    fn submit(&self, request: Request) {
        submit_request(&self.events, &self.accepting, request);
    }

    pub fn execute_async<F>(&self, command: VehicleCommand, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.submit(Request::Execute {
            command,
            callback: Box::new(callback),
        });
    }

    pub fn execute(&self, command: VehicleCommand) -> Outcome {
        wait_for(Outcome::Cancelled, |resolver| {
            self.execute_async(command, move |outcome| resolver.resolve(outcome))
        })
    }

    /// Upload a mission list
    pub fn upload_async<F>(&self, items: Vec<MissionItem>, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.upload_type_async(MissionType::Mission, items, callback);
    }

    pub fn upload_type_async<F>(&self, mission_type: MissionType, items: Vec<MissionItem>, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.submit(Request::Upload {
            mission_type,
            items,
            callback: Box::new(callback),
        });
    }

    pub fn upload(&self, items: Vec<MissionItem>) -> Outcome {
        self.upload_type(MissionType::Mission, items)
    }

    pub fn upload_type(&self, mission_type: MissionType, items: Vec<MissionItem>) -> Outcome {
        wait_for(Outcome::Cancelled, |resolver| {
            self.upload_type_async(mission_type, items, move |outcome| resolver.resolve(outcome))
        })
    }

    /// Download the mission list
    pub fn download_async<F>(&self, callback: F)
    where
        F: FnOnce(Outcome, Vec<MissionItem>) + Send + 'static,
    {
        self.download_type_async(MissionType::Mission, callback);
    }

    pub fn download_type_async<F>(&self, mission_type: MissionType, callback: F)
    where
        F: FnOnce(Outcome, Vec<MissionItem>) + Send + 'static,
    {
        self.submit(Request::Download {
            mission_type,
            callback: Box::new(callback),
        });
    }

    pub fn download(&self) -> (Outcome, Vec<MissionItem>) {
        self.download_type(MissionType::Mission)
    }

    pub fn download_type(&self, mission_type: MissionType) -> (Outcome, Vec<MissionItem>) {
        wait_for((Outcome::Cancelled, Vec::new()), |resolver| {
            self.download_type_async(mission_type, move |outcome, items| {
                resolver.resolve((outcome, items))
            })
        })
    }

    /// Delete a list on the vehicle, cancelling any transfer in progress
    pub fn clear_async<F>(&self, mission_type: MissionType, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.submit(Request::Clear {
            mission_type,
            callback: Box::new(callback),
        });
    }

    pub fn clear(&self, mission_type: MissionType) -> Outcome {
        wait_for(Outcome::Cancelled, |resolver| {
            self.clear_async(mission_type, move |outcome| resolver.resolve(outcome))
        })
    }

    /// Abort the running upload or download; its callback gets `Cancelled`
    pub fn cancel_transfer(&self) {
        self.submit(Request::CancelTransfer);
    }

    /// Call `callback` every time the mission on the vehicle changes
    pub fn subscribe_mission_changed<F>(&self, callback: F)
    where
        F: FnMut(MissionSignature) + Send + 'static,
    {
        self.submit(Request::SubscribeMissionChanged(Box::new(callback)));
    }

    /// Call `handler` for every frame of `message_type` from the vehicle
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F)
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.submit(Request::Subscribe {
            message_type,
            handler: Box::new(handler),
        });
    }

    pub fn peer_connected(&self) -> bool {
        self.status.connected()
    }

    pub fn peer_has_autopilot(&self) -> bool {
        self.status.has_autopilot()
    }

    /// Wait until a vehicle with an autopilot has been discovered
    pub fn wait_for_autopilot(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.peer_connected() && self.peer_has_autopilot() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(PEER_POLL_INTERVAL);
        }
    }

    /// Stop the dispatch thread, resolving everything outstanding
    pub fn shutdown(&mut self) -> GcsResult<()> {
        let dispatch = match self.dispatch.take() {
            Some(dispatch) => dispatch,
            None => return Ok(()),
        };
        // Fails only if the thread already exited.
        let _ = self.events.send(Event::Shutdown);
        dispatch
            .join()
            .map_err(|_| GcsError::Channel("Dispatch thread panicked".to_string()))?;

        if let Some(receiver) = self.receiver.take() {
            receiver
                .join()
                .map_err(|_| GcsError::Channel("UDP receiver panicked".to_string()))?;
        }
        info!("GCS client stopped");
        Ok(())
    }
}

impl Drop for GcsClient {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Shutdown failed: {}", e);
        }
    }
}

/// Queue `request` unless the dispatch thread has stopped taking requests
///
/// The send happens under the `accepting` lock, so a request either lands
/// before the final drain or is rejected here.
fn submit_request(events: &Sender<Event>, accepting: &Mutex<bool>, request: Request) {
    let open = accepting.lock().unwrap_or_else(PoisonError::into_inner);
    if !*open {
        drop(open);
        request.reject(Outcome::ConnectionError);
        return;
    }
    if let Err(mpsc::SendError(event)) = events.send(Event::Request(request)) {
        drop(open);
        if let Event::Request(request) = event {
            warn!("Dispatch thread is gone");
            request.reject(Outcome::ConnectionError);
        }
    }
}

fn dispatch_loop(mut engine: Engine, queue: Receiver<Event>, accepting: Arc<Mutex<bool>>) {
    loop {
        engine.fire_due_timers(Instant::now());

        let event = match engine.next_deadline() {
            Some(deadline) => match queue.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match queue.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        let now = Instant::now();
        match event {
            Event::Inbound(frame) => engine.handle_frame(frame, now),
            Event::Request(request) => engine.submit(request, now),
            Event::Shutdown => break,
        }
    }

    debug!("Dispatch thread shutting down");
    engine.shutdown(Instant::now());
    *accepting.lock().unwrap_or_else(PoisonError::into_inner) = false;
    for event in queue.try_iter() {
        if let Event::Request(request) = event {
            request.reject(Outcome::ConnectionError);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ChannelLink;
    use gcslibgs::{CommandAck, Heartbeat, MavResult, Message, PeerIdentity};

    const VEHICLE: PeerIdentity = PeerIdentity::new(1, 1);

    fn client() -> (GcsClient, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        let client = GcsClient::new(EngineConfig::default(), Arc::new(ChannelLink::new(tx))).unwrap();
        (client, rx)
    }

    #[test]
    fn test_no_system() {
        let (client, _rx) = client();
        assert!(!client.peer_connected());
        assert_eq!(client.execute(VehicleCommand::arm()), Outcome::NoSystem);
        assert_eq!(client.download(), (Outcome::NoSystem, Vec::new()));
        assert!(!client.wait_for_autopilot(Duration::from_millis(20)));
    }

    #[test]
    fn test_execute_round_trip() {
        let (client, rx) = client();
        let sink = client.inbound();
        assert!(sink.deliver(Frame::new(VEHICLE, Message::Heartbeat(Heartbeat::autopilot()))));
        assert!(client.wait_for_autopilot(Duration::from_secs(1)));

        let vehicle = thread::spawn(move || {
            let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            let command = match frame.message {
                Message::CommandLong(command) => command,
                other => panic!("unexpected {:?}", other),
            };
            sink.deliver(Frame::new(
                VEHICLE,
                Message::CommandAck(CommandAck {
                    target: frame.sender,
                    command: command.command,
                    result: MavResult::Accepted,
                    progress: 0,
                }),
            ));
        });

        assert_eq!(client.execute(VehicleCommand::arm()), Outcome::Success);
        vehicle.join().unwrap();
    }

    #[test]
    fn test_requests_racing_shutdown_all_resolve() {
        let (tx, _rx) = mpsc::channel();
        let engine = Engine::new(EngineConfig::default(), Arc::new(ChannelLink::new(tx)));
        let (events, queue) = mpsc::channel();
        let accepting = Arc::new(Mutex::new(true));
        let gate = accepting.clone();
        let dispatch = thread::spawn(move || dispatch_loop(engine, queue, gate));

        let (done_tx, done_rx) = mpsc::channel();
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let events = events.clone();
                let accepting = accepting.clone();
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        let done_tx = done_tx.clone();
                        let request = Request::Execute {
                            command: VehicleCommand::arm(),
                            callback: Box::new(move |outcome| {
                                let _ = done_tx.send(outcome);
                            }),
                        };
                        submit_request(&events, &accepting, request);
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(1));
        events.send(Event::Shutdown).unwrap();

        for submitter in submitters {
            submitter.join().unwrap();
        }
        dispatch.join().unwrap();
        drop(done_tx);
        let outcomes: Vec<Outcome> = done_rx.iter().collect();
        assert_eq!(outcomes.len(), 1000);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Outcome::NoSystem | Outcome::ConnectionError)));
    }

    #[test]
    fn test_shutdown_cancels_pending() {
        let (mut client, _rx) = client();
        client
            .inbound()
            .deliver(Frame::new(VEHICLE, Message::Heartbeat(Heartbeat::autopilot())));
        assert!(client.wait_for_autopilot(Duration::from_secs(1)));

        let (tx, rx) = mpsc::channel();
        client.execute_async(VehicleCommand::land(), move |outcome| {
            let _ = tx.send(outcome);
        });
        client.shutdown().unwrap();
        assert_eq!(rx.recv().unwrap(), Outcome::Cancelled);

        // Requests after shutdown resolve at once.
        assert_eq!(client.execute(VehicleCommand::land()), Outcome::ConnectionError);
    }
}
