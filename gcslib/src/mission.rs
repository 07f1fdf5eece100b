//! Mission transfer protocol
//!
//! Moves a whole item list to or from the vehicle one item at a time.
//!
//! Upload: we send MISSION_COUNT, the vehicle asks for items by index in any
//! order (possibly asking twice), and finishes with MISSION_ACK. Download:
//! we ask for the count, then for each index in turn, and acknowledge once
//! everything has arrived. Every wait is guarded by one timer per vehicle
//! with the mission retry policy.
//!
//! At most one transfer session exists per vehicle.

use std::collections::HashMap;

use gcslibgs::{
    MavMissionResult, Message, MissionAck, MissionClearAll, MissionCount, MissionCurrent,
    MissionItem, MissionItemInt, MissionRequestInt, MissionRequestList, MissionSignature,
    MissionType, Outcome, PeerIdentity,
};
use log::{debug, info, warn};

use crate::command::ResultCallback;
use crate::config::RetryPolicy;
use crate::engine::Context;
use crate::notify::{MissionChangeNotifier, MissionChangedCallback};
use crate::timer::{Attempts, Expiry, TimerKey};

/// Completion callback of a download
pub type DownloadCallback = Box<dyn FnOnce(Outcome, Vec<MissionItem>) + Send>;

/// Map a MISSION_ACK result to an outcome
pub fn mission_ack_outcome(result: MavMissionResult) -> Outcome {
    match result {
        MavMissionResult::Accepted => Outcome::Success,
        MavMissionResult::NoSpace => Outcome::NoSpace,
        MavMissionResult::InvalidSequence => Outcome::InvalidSequence,
        MavMissionResult::Denied
        | MavMissionResult::Invalid
        | MavMissionResult::Unsupported
        | MavMissionResult::UnsupportedFrame => Outcome::CommandDenied,
        MavMissionResult::OperationCancelled => Outcome::Cancelled,
        MavMissionResult::Error => Outcome::Unknown,
    }
}

/// Check an item list before anything goes on the wire
///
/// Sequence numbers must run 0..N-1 in order and every item must belong to
/// `mission_type`. A mission list needs exactly one current item, and it
/// must be a navigation item.
pub fn validate_items(items: &[MissionItem], mission_type: MissionType) -> Result<u16, String> {
    if items.is_empty() {
        return Err("Empty item list".to_string());
    }
    let count = u16::try_from(items.len()).map_err(|_| format!("{} items is too many", items.len()))?;

    let mut current = 0;
    for (index, item) in items.iter().enumerate() {
        if usize::from(item.seq) != index {
            return Err(format!("Item {} carries sequence {}", index, item.seq));
        }
        if item.mission_type != mission_type {
            return Err(format!(
                "Item {} is {:?}, expected {:?}",
                index, item.mission_type, mission_type
            ));
        }
        if item.is_current() {
            if !item.is_navigation() {
                return Err(format!("Current flag on non-navigation item {}", index));
            }
            current += 1;
        }
    }

    if mission_type == MissionType::Mission && current != 1 {
        return Err(format!("{} current items, expected exactly one", current));
    }
    Ok(count)
}

/// Where an upload stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Count sent, no item requested yet
    SendingCount,
    /// Answering item requests; some items were never asked for
    AwaitingItemRequests,
    /// Every item went out at least once; waiting for the final ack
    SendingAck,
}

struct UploadSession {
    mission_type: MissionType,
    items: Vec<MissionItem>,
    sent: Vec<bool>,
    last_sent: Option<u16>,
    state: UploadState,
    attempts: Attempts,
    callback: ResultCallback,
}

struct DownloadSession {
    mission_type: MissionType,
    expected: Option<u16>,
    items: Vec<MissionItem>,
    attempts: Attempts,
    callback: DownloadCallback,
}

struct ClearSession {
    mission_type: MissionType,
    attempts: Attempts,
    callback: ResultCallback,
}

enum TransferSession {
    Upload(UploadSession),
    Download(DownloadSession),
    Clear(ClearSession),
}

impl TransferSession {
    fn mission_type(&self) -> MissionType {
        match self {
            TransferSession::Upload(s) => s.mission_type,
            TransferSession::Download(s) => s.mission_type,
            TransferSession::Clear(s) => s.mission_type,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TransferSession::Upload(_) => "upload",
            TransferSession::Download(_) => "download",
            TransferSession::Clear(_) => "clear",
        }
    }

    /// Invoke the callback; a download hands over its items only on success
    fn resolve(self, outcome: Outcome) {
        match self {
            TransferSession::Upload(s) => (s.callback)(outcome),
            TransferSession::Download(s) => {
                let items = if outcome.is_success() { s.items } else { Vec::new() };
                (s.callback)(outcome, items)
            }
            TransferSession::Clear(s) => (s.callback)(outcome),
        }
    }
}

pub struct MissionProtocol {
    policy: RetryPolicy,
    sessions: HashMap<PeerIdentity, TransferSession>,
    notifier: MissionChangeNotifier,
}

impl MissionProtocol {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sessions: HashMap::new(),
            notifier: MissionChangeNotifier::new(),
        }
    }

    pub fn is_active(&self, peer: PeerIdentity) -> bool {
        self.sessions.contains_key(&peer)
    }

    /// State of the upload to `peer`, if one is running
    pub fn upload_state(&self, peer: PeerIdentity) -> Option<UploadState> {
        match self.sessions.get(&peer) {
            Some(TransferSession::Upload(s)) => Some(s.state),
            _ => None,
        }
    }

    pub fn subscribe_changed(&mut self, callback: MissionChangedCallback) {
        self.notifier.subscribe(callback);
    }

    pub fn signature(&self) -> Option<MissionSignature> {
        self.notifier.current()
    }

    pub fn upload(
        &mut self,
        ctx: &mut Context<'_>,
        mission_type: MissionType,
        items: Vec<MissionItem>,
        callback: ResultCallback,
    ) {
        let count = match validate_items(&items, mission_type) {
            Ok(count) => count,
            Err(reason) => {
                warn!("Rejecting upload: {}", reason);
                callback(Outcome::InvalidArgument);
                return;
            }
        };
        let peer = match self.idle_target(ctx) {
            Ok(peer) => peer,
            Err(outcome) => {
                callback(outcome);
                return;
            }
        };

        info!("Uploading {} {:?} items to {}", count, mission_type, peer);
        let sent = ctx.system.send(Message::MissionCount(MissionCount {
            target: peer,
            count,
            mission_type,
        }));
        if let Err(e) = sent {
            warn!("Failed to send mission count: {}", e);
            callback(Outcome::ConnectionError);
            return;
        }

        let attempts = self.start_wait(ctx, peer);
        self.sessions.insert(
            peer,
            TransferSession::Upload(UploadSession {
                mission_type,
                sent: vec![false; items.len()],
                items,
                last_sent: None,
                state: UploadState::SendingCount,
                attempts,
                callback,
            }),
        );
    }

    pub fn download(&mut self, ctx: &mut Context<'_>, mission_type: MissionType, callback: DownloadCallback) {
        let peer = match self.idle_target(ctx) {
            Ok(peer) => peer,
            Err(outcome) => {
                callback(outcome, Vec::new());
                return;
            }
        };

        info!("Downloading {:?} from {}", mission_type, peer);
        let sent = ctx.system.send(Message::MissionRequestList(MissionRequestList {
            target: peer,
            mission_type,
        }));
        if let Err(e) = sent {
            warn!("Failed to send mission request list: {}", e);
            callback(Outcome::ConnectionError, Vec::new());
            return;
        }

        let attempts = self.start_wait(ctx, peer);
        self.sessions.insert(
            peer,
            TransferSession::Download(DownloadSession {
                mission_type,
                expected: None,
                items: Vec::new(),
                attempts,
                callback,
            }),
        );
    }

    /// Delete a list on the vehicle, cancelling any transfer in progress
    pub fn clear(&mut self, ctx: &mut Context<'_>, mission_type: MissionType, callback: ResultCallback) {
        let peer = match ctx.system.target() {
            Some(peer) => peer,
            None => {
                callback(Outcome::NoSystem);
                return;
            }
        };
        if matches!(self.sessions.get(&peer), Some(TransferSession::Clear(_))) {
            debug!("Clear already in progress for {}", peer);
            callback(Outcome::Busy);
            return;
        }
        if self.sessions.contains_key(&peer) {
            self.cancel(ctx);
        }

        info!("Clearing {:?} on {}", mission_type, peer);
        if let Err(e) = send_clear(ctx, peer, mission_type) {
            warn!("Failed to send mission clear: {}", e);
            callback(Outcome::ConnectionError);
            return;
        }

        let attempts = self.start_wait(ctx, peer);
        self.sessions.insert(
            peer,
            TransferSession::Clear(ClearSession {
                mission_type,
                attempts,
                callback,
            }),
        );
    }

    /// Abort the session with the current vehicle; returns whether one was active
    pub fn cancel(&mut self, ctx: &mut Context<'_>) -> bool {
        let peer = match ctx.system.peer() {
            Some(peer) => peer,
            None => return false,
        };
        let session = match self.sessions.remove(&peer) {
            Some(session) => session,
            None => return false,
        };
        ctx.timers.cancel(TimerKey::Transfer(peer));
        info!("Cancelling mission {} with {}", session.name(), peer);

        if !matches!(session, TransferSession::Clear(_)) {
            let sent = send_ack(ctx, peer, MavMissionResult::OperationCancelled, session.mission_type());
            if let Err(e) = sent {
                debug!("Could not tell {} about the cancel: {}", peer, e);
            }
        }
        session.resolve(Outcome::Cancelled);
        true
    }

    pub fn handle_request(&mut self, ctx: &mut Context<'_>, sender: PeerIdentity, request: &MissionRequestInt) {
        let upload = match self.sessions.get_mut(&sender) {
            Some(TransferSession::Upload(s)) if s.mission_type == request.mission_type => s,
            _ => {
                debug!("Ignoring item request {} from {}", request.seq, sender);
                return;
            }
        };

        let index = usize::from(request.seq);
        let item = match upload.items.get(index) {
            Some(item) => *item,
            None => {
                warn!(
                    "Vehicle requested item {} of {}",
                    request.seq,
                    upload.items.len()
                );
                return;
            }
        };
        if upload.sent[index] {
            debug!("Item {} requested again", request.seq);
        }

        let sent = ctx.system.send(Message::MissionItemInt(MissionItemInt {
            target: sender,
            item,
        }));
        if let Err(e) = sent {
            warn!("Failed to send mission item {}: {}", request.seq, e);
            self.finish(ctx, sender, Outcome::ConnectionError);
            return;
        }

        upload.sent[index] = true;
        upload.last_sent = Some(request.seq);
        let state = if upload.sent.iter().all(|&s| s) {
            UploadState::SendingAck
        } else {
            UploadState::AwaitingItemRequests
        };
        if state != upload.state {
            debug!("Upload to {}: {:?} -> {:?}", sender, upload.state, state);
            upload.state = state;
        }
        upload.attempts.restart(ctx.now);
        ctx.timers.schedule(TimerKey::Transfer(sender), upload.attempts.deadline());
    }

    pub fn handle_count(&mut self, ctx: &mut Context<'_>, sender: PeerIdentity, count: &MissionCount) {
        let download = match self.sessions.get_mut(&sender) {
            Some(TransferSession::Download(s)) if s.mission_type == count.mission_type => s,
            _ => {
                debug!("Ignoring mission count from {}", sender);
                return;
            }
        };
        if download.expected.is_some() {
            debug!("Duplicate mission count from {}", sender);
            return;
        }

        debug!("Vehicle {} holds {} items", sender, count.count);
        download.expected = Some(count.count);
        if count.count == 0 {
            self.complete_download(ctx, sender);
            return;
        }
        self.request_next(ctx, sender);
    }

    pub fn handle_item(&mut self, ctx: &mut Context<'_>, sender: PeerIdentity, message: &MissionItemInt) {
        let item = message.item;
        let download = match self.sessions.get_mut(&sender) {
            Some(TransferSession::Download(s)) if s.mission_type == item.mission_type => s,
            _ => {
                debug!("Ignoring mission item {} from {}", item.seq, sender);
                return;
            }
        };
        let expected = match download.expected {
            Some(expected) => expected,
            None => return,
        };
        if usize::from(item.seq) != download.items.len() {
            debug!(
                "Ignoring item {} while waiting for {}",
                item.seq,
                download.items.len()
            );
            return;
        }

        download.items.push(item);
        if download.items.len() == usize::from(expected) {
            self.complete_download(ctx, sender);
        } else {
            self.request_next(ctx, sender);
        }
    }

    pub fn handle_ack(&mut self, ctx: &mut Context<'_>, sender: PeerIdentity, ack: &MissionAck) {
        let session = match self.sessions.get(&sender) {
            Some(session) if session.mission_type() == ack.mission_type => session,
            _ => {
                debug!("Ignoring mission ack {:?} from {}", ack.result, sender);
                return;
            }
        };

        let outcome = match (session, ack.result) {
            (TransferSession::Download(_), MavMissionResult::Accepted) => {
                debug!("Ignoring accept during download");
                return;
            }
            (TransferSession::Upload(s), MavMissionResult::Accepted) if s.state != UploadState::SendingAck => {
                warn!("Vehicle accepted upload before receiving every item");
                Outcome::Unknown
            }
            (_, result) => mission_ack_outcome(result),
        };

        if outcome.is_success() {
            match session {
                TransferSession::Upload(s) if s.mission_type == MissionType::Mission => {
                    let signature = MissionSignature::of(&s.items);
                    self.notifier.announce(signature);
                }
                TransferSession::Clear(s) if s.mission_type == MissionType::Mission => {
                    self.notifier.changed(MissionSignature::empty());
                }
                _ => {}
            }
        }
        self.finish(ctx, sender, outcome);
    }

    /// Unsolicited mission status from the vehicle
    pub fn handle_current(&mut self, current: &MissionCurrent) {
        let signature = if current.total == 0 {
            MissionSignature::empty()
        } else {
            current.signature()
        };
        self.notifier.observe_unsolicited(signature);
    }

    pub fn handle_timeout(&mut self, ctx: &mut Context<'_>, peer: PeerIdentity) {
        let session = match self.sessions.get_mut(&peer) {
            Some(session) => session,
            None => return,
        };
        let attempts = match &mut *session {
            TransferSession::Upload(s) => &mut s.attempts,
            TransferSession::Download(s) => &mut s.attempts,
            TransferSession::Clear(s) => &mut s.attempts,
        };
        if attempts.expire(ctx.now) == Expiry::Exhausted {
            warn!("Mission {} with {} timed out", session.name(), peer);
            self.finish(ctx, peer, Outcome::Timeout);
            return;
        }
        let retry = attempts.retries();
        let deadline = attempts.deadline();

        let resend = match &*session {
            TransferSession::Upload(s) => match s.last_sent {
                None => Message::MissionCount(MissionCount {
                    target: peer,
                    count: s.sent.len() as u16,
                    mission_type: s.mission_type,
                }),
                Some(seq) => Message::MissionItemInt(MissionItemInt {
                    target: peer,
                    item: s.items[usize::from(seq)],
                }),
            },
            TransferSession::Download(s) => match s.expected {
                None => Message::MissionRequestList(MissionRequestList {
                    target: peer,
                    mission_type: s.mission_type,
                }),
                Some(_) => Message::MissionRequestInt(MissionRequestInt {
                    target: peer,
                    seq: s.items.len() as u16,
                    mission_type: s.mission_type,
                }),
            },
            TransferSession::Clear(s) => Message::MissionClearAll(MissionClearAll {
                target: peer,
                mission_type: s.mission_type,
            }),
        };

        warn!("Mission {} with {} timed out, retry {}", session.name(), peer, retry);
        if let Err(e) = ctx.system.send(resend) {
            warn!("Failed to resend: {}", e);
            self.finish(ctx, peer, Outcome::ConnectionError);
            return;
        }
        ctx.timers.schedule(TimerKey::Transfer(peer), deadline);
    }

    /// Resolve every session with `Cancelled`
    pub fn cancel_all(&mut self, ctx: &mut Context<'_>) {
        for (peer, session) in self.sessions.drain() {
            ctx.timers.cancel(TimerKey::Transfer(peer));
            session.resolve(Outcome::Cancelled);
        }
    }

    /// The vehicle to start a new session with, or why there is none
    fn idle_target(&self, ctx: &Context<'_>) -> Result<PeerIdentity, Outcome> {
        let peer = ctx.system.target().ok_or(Outcome::NoSystem)?;
        if self.sessions.contains_key(&peer) {
            debug!("Mission transfer with {} already active", peer);
            return Err(Outcome::Busy);
        }
        Ok(peer)
    }

    fn start_wait(&self, ctx: &mut Context<'_>, peer: PeerIdentity) -> Attempts {
        let attempts = Attempts::new(self.policy, ctx.now);
        ctx.timers.schedule(TimerKey::Transfer(peer), attempts.deadline());
        attempts
    }

    /// Ask for the next download item and restart the wait
    fn request_next(&mut self, ctx: &mut Context<'_>, peer: PeerIdentity) {
        let download = match self.sessions.get_mut(&peer) {
            Some(TransferSession::Download(s)) => s,
            _ => return,
        };
        let sent = ctx.system.send(Message::MissionRequestInt(MissionRequestInt {
            target: peer,
            seq: download.items.len() as u16,
            mission_type: download.mission_type,
        }));
        if let Err(e) = sent {
            warn!("Failed to request mission item: {}", e);
            self.finish(ctx, peer, Outcome::ConnectionError);
            return;
        }
        download.attempts.restart(ctx.now);
        ctx.timers.schedule(TimerKey::Transfer(peer), download.attempts.deadline());
    }

    fn complete_download(&mut self, ctx: &mut Context<'_>, peer: PeerIdentity) {
        let download = match self.sessions.get(&peer) {
            Some(TransferSession::Download(s)) => s,
            _ => return,
        };
        if let Err(e) = send_ack(ctx, peer, MavMissionResult::Accepted, download.mission_type) {
            debug!("Could not acknowledge download: {}", e);
        }
        if download.mission_type == MissionType::Mission {
            self.notifier.record(MissionSignature::of(&download.items));
        }
        info!("Downloaded {} items from {}", download.items.len(), peer);
        self.finish(ctx, peer, Outcome::Success);
    }

    /// Remove the session before its callback runs
    fn finish(&mut self, ctx: &mut Context<'_>, peer: PeerIdentity, outcome: Outcome) {
        if let Some(session) = self.sessions.remove(&peer) {
            ctx.timers.cancel(TimerKey::Transfer(peer));
            debug!("Mission {} with {} finished: {}", session.name(), peer, outcome);
            session.resolve(outcome);
        }
    }
}

fn send_ack(
    ctx: &Context<'_>,
    peer: PeerIdentity,
    result: MavMissionResult,
    mission_type: MissionType,
) -> gcslibgs::GcsResult<()> {
    ctx.system.send(Message::MissionAck(MissionAck {
        target: peer,
        result,
        mission_type,
    }))
}

fn send_clear(ctx: &Context<'_>, peer: PeerIdentity, mission_type: MissionType) -> gcslibgs::GcsResult<()> {
    ctx.system.send(Message::MissionClearAll(MissionClearAll {
        target: peer,
        mission_type,
    }))
}
