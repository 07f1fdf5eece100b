//! Command protocol
//!
//! Sends COMMAND_LONG to the vehicle and waits for the matching
//! COMMAND_ACK, retransmitting on timeout. At most one command per
//! (vehicle, command code) is in flight; a second one is rejected with
//! `Busy` rather than queued.

use std::collections::HashMap;

use gcslibgs::{
    CommandAck, CommandLong, MavResult, Message, Outcome, PeerIdentity, MAV_CMD_NAV_LAND,
    MAV_CMD_NAV_RETURN_TO_LAUNCH, MAV_CMD_NAV_TAKEOFF,
};
use log::{debug, info, warn};

use crate::config::constants::MAX_PROGRESS_EXTENSIONS;
use crate::config::RetryPolicy;
use crate::engine::Context;
use crate::timer::{Attempts, Expiry, TimerKey};

/// MAV_CMD_COMPONENT_ARM_DISARM
pub const MAV_CMD_COMPONENT_ARM_DISARM: u16 = 400;

/// MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN
pub const MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN: u16 = 246;

/// MAV_CMD_DO_REPOSITION
pub const MAV_CMD_DO_REPOSITION: u16 = 192;

/// MAV_CMD_DO_VTOL_TRANSITION
pub const MAV_CMD_DO_VTOL_TRANSITION: u16 = 3000;

/// Magic param2 of ARM_DISARM that disarms even in flight
const FORCE_DISARM_MAGIC: f32 = 21196.0;

/// MAV_DO_REPOSITION_FLAGS_CHANGE_MODE
const REPOSITION_CHANGE_MODE: f32 = 1.0;

/// MAV_VTOL_STATE_MC
const VTOL_STATE_MC: f32 = 3.0;

/// MAV_VTOL_STATE_FW
const VTOL_STATE_FW: f32 = 4.0;

/// Completion callback carrying the outcome of an operation
///
/// Runs exactly once. A command the vehicle keeps reporting as in progress
/// still resolves `Timeout` after `MAX_PROGRESS_EXTENSIONS` extensions.
pub type ResultCallback = Box<dyn FnOnce(Outcome) + Send>;

/// A command code plus its seven parameters
///
/// Parameters that are not set stay NaN, which the vehicle reads as
/// "leave unchanged".
#[derive(Debug, Clone, Copy)]
pub struct VehicleCommand {
    pub command: u16,
    pub params: [f32; 7],
}

impl VehicleCommand {
    pub fn new(command: u16) -> Self {
        Self {
            command,
            params: [f32::NAN; 7],
        }
    }

    /// Set param1..param7 by zero-based index; indices past 6 are ignored
    pub fn with_param(mut self, index: usize, value: f32) -> Self {
        if let Some(slot) = self.params.get_mut(index) {
            *slot = value;
        }
        self
    }

    pub fn arm() -> Self {
        Self::new(MAV_CMD_COMPONENT_ARM_DISARM).with_param(0, 1.0)
    }

    pub fn disarm() -> Self {
        Self::new(MAV_CMD_COMPONENT_ARM_DISARM).with_param(0, 0.0)
    }

    /// Take off to `altitude_m` above home
    pub fn takeoff(altitude_m: f32) -> Self {
        Self::new(MAV_CMD_NAV_TAKEOFF).with_param(6, altitude_m)
    }

    pub fn land() -> Self {
        Self::new(MAV_CMD_NAV_LAND)
    }

    pub fn return_to_launch() -> Self {
        Self::new(MAV_CMD_NAV_RETURN_TO_LAUNCH)
    }

    /// Reboot the autopilot
    pub fn reboot() -> Self {
        Self::new(MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN).with_param(0, 1.0)
    }

    /// Power down the autopilot; usually refused unless disarmed
    pub fn shutdown() -> Self {
        Self::new(MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN).with_param(0, 2.0)
    }

    /// Disarm immediately, even in flight
    pub fn kill() -> Self {
        Self::disarm().with_param(1, FORCE_DISARM_MAGIC)
    }

    /// Fly to a global position (altitude AMSL, yaw in degrees)
    ///
    /// COMMAND_LONG carries the position as f32, so it is good to about a
    /// metre.
    pub fn goto_location(latitude_deg: f64, longitude_deg: f64, altitude_m: f32, yaw_deg: f32) -> Self {
        Self::new(MAV_CMD_DO_REPOSITION)
            .with_param(0, -1.0)
            .with_param(1, REPOSITION_CHANGE_MODE)
            .with_param(3, yaw_deg.to_radians())
            .with_param(4, latitude_deg as f32)
            .with_param(5, longitude_deg as f32)
            .with_param(6, altitude_m)
    }

    pub fn transition_to_fixedwing() -> Self {
        Self::new(MAV_CMD_DO_VTOL_TRANSITION).with_param(0, VTOL_STATE_FW)
    }

    pub fn transition_to_multicopter() -> Self {
        Self::new(MAV_CMD_DO_VTOL_TRANSITION).with_param(0, VTOL_STATE_MC)
    }
}

/// Map a terminal COMMAND_ACK result; `None` means keep waiting
fn ack_outcome(result: MavResult) -> Option<Outcome> {
    match result {
        MavResult::Accepted => Some(Outcome::Success),
        MavResult::TemporarilyRejected => Some(Outcome::Busy),
        MavResult::Denied | MavResult::Failed => Some(Outcome::CommandDenied),
        MavResult::Unsupported => Some(Outcome::Unknown),
        MavResult::Cancelled => Some(Outcome::Cancelled),
        MavResult::InProgress => None,
    }
}

struct PendingCommand {
    command: VehicleCommand,
    confirmation: u8,
    extensions: u32,
    attempts: Attempts,
    callback: ResultCallback,
}

pub struct CommandProtocol {
    policy: RetryPolicy,
    pending: HashMap<(PeerIdentity, u16), PendingCommand>,
}

impl CommandProtocol {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn execute(&mut self, ctx: &mut Context<'_>, command: VehicleCommand, callback: ResultCallback) {
        let peer = match ctx.system.target() {
            Some(peer) => peer,
            None => {
                debug!("Command {} rejected: no vehicle", command.command);
                callback(Outcome::NoSystem);
                return;
            }
        };

        let key = (peer, command.command);
        if self.pending.contains_key(&key) {
            debug!("Command {} already in flight to {}", command.command, peer);
            callback(Outcome::Busy);
            return;
        }

        if let Err(e) = send_command(ctx, peer, &command, 0) {
            warn!("Failed to send command {}: {}", command.command, e);
            callback(Outcome::ConnectionError);
            return;
        }

        let attempts = Attempts::new(self.policy, ctx.now);
        ctx.timers.schedule(timer_key(key), attempts.deadline());
        self.pending.insert(
            key,
            PendingCommand {
                command,
                confirmation: 0,
                extensions: 0,
                attempts,
                callback,
            },
        );
    }

    pub fn handle_ack(&mut self, ctx: &mut Context<'_>, sender: PeerIdentity, ack: &CommandAck) {
        let key = (sender, ack.command);
        let outcome = match ack_outcome(ack.result) {
            Some(outcome) => outcome,
            None => match self.pending.get_mut(&key) {
                Some(pending) if pending.extensions < MAX_PROGRESS_EXTENSIONS => {
                    debug!("Command {} in progress ({}%)", ack.command, ack.progress);
                    pending.extensions += 1;
                    pending.attempts.restart(ctx.now);
                    ctx.timers.schedule(timer_key(key), pending.attempts.deadline());
                    return;
                }
                Some(_) => {
                    warn!(
                        "Command {} never finished after {} progress reports",
                        ack.command, MAX_PROGRESS_EXTENSIONS
                    );
                    Outcome::Timeout
                }
                None => return,
            },
        };

        match self.pending.remove(&key) {
            Some(pending) => {
                ctx.timers.cancel(timer_key(key));
                info!("Command {} to {}: {}", ack.command, sender, outcome);
                (pending.callback)(outcome);
            }
            None => debug!("Ignoring unmatched ack for command {}", ack.command),
        }
    }

    pub fn handle_timeout(&mut self, ctx: &mut Context<'_>, peer: PeerIdentity, command: u16) {
        let key = (peer, command);
        let pending = match self.pending.get_mut(&key) {
            Some(pending) => pending,
            None => return,
        };

        let outcome = match pending.attempts.expire(ctx.now) {
            Expiry::Retry => {
                pending.confirmation = pending.confirmation.wrapping_add(1);
                warn!(
                    "Command {} timed out, retry {}",
                    command,
                    pending.attempts.retries()
                );
                match send_command(ctx, peer, &pending.command, pending.confirmation) {
                    Ok(()) => {
                        ctx.timers.schedule(timer_key(key), pending.attempts.deadline());
                        return;
                    }
                    Err(e) => {
                        warn!("Failed to resend command {}: {}", command, e);
                        Outcome::ConnectionError
                    }
                }
            }
            Expiry::Exhausted => {
                warn!("Command {} to {} timed out", command, peer);
                Outcome::Timeout
            }
        };

        if let Some(pending) = self.pending.remove(&key) {
            (pending.callback)(outcome);
        }
    }

    /// Resolve every pending command with `Cancelled`
    pub fn cancel_all(&mut self, ctx: &mut Context<'_>) {
        for (key, pending) in self.pending.drain() {
            ctx.timers.cancel(timer_key(key));
            (pending.callback)(Outcome::Cancelled);
        }
    }
}

fn timer_key((peer, command): (PeerIdentity, u16)) -> TimerKey {
    TimerKey::Command { peer, command }
}

fn send_command(
    ctx: &Context<'_>,
    peer: PeerIdentity,
    command: &VehicleCommand,
    confirmation: u8,
) -> gcslibgs::GcsResult<()> {
    ctx.system.send(Message::CommandLong(CommandLong {
        target: peer,
        command: command.command,
        confirmation,
        params: command.params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::harness::{capture, Harness, VEHICLE};
    use crate::engine::Request;
    use std::time::Duration;

    fn ack(command: u16, result: MavResult) -> Message {
        Message::CommandAck(CommandAck {
            target: Harness::gcs(),
            command,
            result,
            progress: 0,
        })
    }

    fn execute(harness: &mut Harness, command: VehicleCommand) -> crate::engine::harness::Captured<Outcome> {
        let (callback, result) = capture();
        harness.submit(Request::Execute { command, callback });
        result
    }

    fn sent_commands(harness: &Harness) -> Vec<CommandLong> {
        harness
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::CommandLong(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_constructors_leave_unused_params_nan() {
        let cmd = VehicleCommand::takeoff(10.0);
        assert_eq!(cmd.command, MAV_CMD_NAV_TAKEOFF);
        assert_eq!(cmd.params[6], 10.0);
        assert!(cmd.params[..6].iter().all(|p| p.is_nan()));

        assert_eq!(VehicleCommand::arm().params[0], 1.0);
        assert_eq!(VehicleCommand::disarm().params[0], 0.0);
        let ignored = VehicleCommand::land().with_param(9, 1.0);
        assert!(ignored.params.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_no_system_sends_nothing() {
        let mut harness = Harness::new();
        let result = execute(&mut harness, VehicleCommand::arm());
        assert_eq!(result.get(), Some(Outcome::NoSystem));
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn test_accepted() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::arm());
        let sent = sent_commands(&harness);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, VEHICLE);
        assert_eq!(sent[0].confirmation, 0);
        assert_eq!(result.get(), None);

        harness.deliver(ack(MAV_CMD_COMPONENT_ARM_DISARM, MavResult::Accepted));
        assert_eq!(result.get(), Some(Outcome::Success));
        assert_eq!(harness.engine.pending_commands(), 0);
        assert_eq!(harness.engine.next_deadline(), None);
    }

    #[test]
    fn test_ack_mapping() {
        for (code, expected) in [
            (MavResult::Denied, Outcome::CommandDenied),
            (MavResult::Failed, Outcome::CommandDenied),
            (MavResult::TemporarilyRejected, Outcome::Busy),
            (MavResult::Unsupported, Outcome::Unknown),
            (MavResult::Cancelled, Outcome::Cancelled),
        ] {
            let mut harness = Harness::connected();
            let result = execute(&mut harness, VehicleCommand::land());
            harness.deliver(ack(MAV_CMD_NAV_LAND, code));
            assert_eq!(result.get(), Some(expected), "{:?}", code);
        }
    }

    #[test]
    fn test_busy_while_pending() {
        let mut harness = Harness::connected();
        let first = execute(&mut harness, VehicleCommand::arm());
        harness.sent();

        let second = execute(&mut harness, VehicleCommand::disarm());
        assert_eq!(second.get(), Some(Outcome::Busy));
        assert!(harness.sent().is_empty());

        let other = execute(&mut harness, VehicleCommand::land());
        assert_eq!(other.get(), None);
        assert_eq!(harness.engine.pending_commands(), 2);

        harness.deliver(ack(MAV_CMD_COMPONENT_ARM_DISARM, MavResult::Accepted));
        assert_eq!(first.get(), Some(Outcome::Success));
        assert_eq!(other.get(), None);
    }

    #[test]
    fn test_retries_then_timeout() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::arm());

        for _ in 0..3 {
            harness.advance(Harness::TIMEOUT);
            assert_eq!(result.get(), None);
        }
        harness.advance(Harness::TIMEOUT);
        assert_eq!(result.get(), Some(Outcome::Timeout));

        let confirmations: Vec<u8> = sent_commands(&harness).iter().map(|c| c.confirmation).collect();
        assert_eq!(confirmations, vec![0, 1, 2, 3]);
        assert_eq!(harness.engine.pending_commands(), 0);
    }

    #[test]
    fn test_late_ack_after_retry() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::arm());
        harness.advance(Harness::TIMEOUT);
        harness.deliver(ack(MAV_CMD_COMPONENT_ARM_DISARM, MavResult::Accepted));
        assert_eq!(result.get(), Some(Outcome::Success));

        // A second ack for the same command is ignored.
        harness.deliver(ack(MAV_CMD_COMPONENT_ARM_DISARM, MavResult::Denied));
        assert_eq!(result.calls(), 1);
    }

    #[test]
    fn test_in_progress_extends_wait() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::takeoff(5.0));

        harness.advance(Duration::from_millis(80));
        harness.deliver(ack(MAV_CMD_NAV_TAKEOFF, MavResult::InProgress));
        harness.advance(Duration::from_millis(80));
        assert_eq!(sent_commands(&harness).len(), 1);

        harness.deliver(ack(MAV_CMD_NAV_TAKEOFF, MavResult::Accepted));
        assert_eq!(result.get(), Some(Outcome::Success));
    }

    #[test]
    fn test_endless_progress_times_out() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::takeoff(5.0));

        for _ in 0..MAX_PROGRESS_EXTENSIONS {
            harness.advance(Duration::from_millis(80));
            harness.deliver(ack(MAV_CMD_NAV_TAKEOFF, MavResult::InProgress));
            assert_eq!(result.get(), None);
        }
        harness.deliver(ack(MAV_CMD_NAV_TAKEOFF, MavResult::InProgress));
        assert_eq!(result.get(), Some(Outcome::Timeout));
        assert_eq!(result.calls(), 1);
        assert_eq!(harness.engine.pending_commands(), 0);
        assert_eq!(sent_commands(&harness).len(), 1);
    }

    #[test]
    fn test_action_constructors() {
        let kill = VehicleCommand::kill();
        assert_eq!(kill.command, MAV_CMD_COMPONENT_ARM_DISARM);
        assert_eq!(&kill.params[..2], &[0.0, 21196.0]);

        assert_eq!(VehicleCommand::shutdown().params[0], 2.0);
        assert_eq!(VehicleCommand::reboot().params[0], 1.0);

        let goto = VehicleCommand::goto_location(47.398170, 8.545649, 500.0, 90.0);
        assert_eq!(goto.command, MAV_CMD_DO_REPOSITION);
        assert!(goto.params[2].is_nan());
        assert!((goto.params[3] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((goto.params[4] - 47.398170).abs() < 1e-5);
        assert!((goto.params[5] - 8.545649).abs() < 1e-5);
        assert_eq!(goto.params[6], 500.0);

        assert_eq!(VehicleCommand::transition_to_fixedwing().params[0], 4.0);
        assert_eq!(VehicleCommand::transition_to_multicopter().params[0], 3.0);
        assert_eq!(
            VehicleCommand::transition_to_fixedwing().command,
            MAV_CMD_DO_VTOL_TRANSITION
        );
    }

    #[test]
    fn test_shutdown_cancels() {
        let mut harness = Harness::connected();
        let result = execute(&mut harness, VehicleCommand::reboot());
        harness.engine.shutdown(harness.now);
        assert_eq!(result.get(), Some(Outcome::Cancelled));
        assert_eq!(result.calls(), 1);
    }

    #[test]
    fn test_send_failure_is_connection_error() {
        let mut harness = Harness::connected();
        harness.close_link();
        let result = execute(&mut harness, VehicleCommand::arm());
        assert_eq!(result.get(), Some(Outcome::ConnectionError));
        assert_eq!(harness.engine.pending_commands(), 0);
    }
}
