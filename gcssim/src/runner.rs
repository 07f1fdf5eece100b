//! Runs a simulated autopilot on its own thread
//!
//! Frames from the ground arrive on a channel; replies and the periodic
//! heartbeat/MISSION_CURRENT pair go out through a send function.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gcslibgs::{Frame, GcsError, GcsResult};
use log::{debug, info};

use crate::autopilot::SimAutopilot;

pub struct SimRunner {
    autopilot: Arc<Mutex<SimAutopilot>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SimRunner {
    /// Start serving `inbound`; the thread ends when `outbound` returns
    /// false, when `inbound` disconnects, or on `stop`
    pub fn start<F>(autopilot: SimAutopilot, inbound: Receiver<Frame>, mut outbound: F) -> GcsResult<Self>
    where
        F: FnMut(Frame) -> bool + Send + 'static,
    {
        let interval = Duration::from_millis(autopilot.config().heartbeat_interval_ms.max(1));
        let autopilot = Arc::new(Mutex::new(autopilot));
        let running = Arc::new(AtomicBool::new(true));

        let shared = autopilot.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("gcssim".to_string())
            .spawn(move || {
                let mut next_beat = Instant::now();
                'serve: while flag.load(Ordering::SeqCst) {
                    if Instant::now() >= next_beat {
                        let beat = {
                            let sim = lock(&shared);
                            [sim.heartbeat(), sim.mission_current()]
                        };
                        for frame in beat {
                            if !outbound(frame) {
                                break 'serve;
                            }
                        }
                        next_beat += interval;
                    }

                    let wait = next_beat.saturating_duration_since(Instant::now());
                    match inbound.recv_timeout(wait) {
                        Ok(frame) => {
                            let replies = lock(&shared).handle(frame);
                            for reply in replies {
                                if !outbound(reply) {
                                    break 'serve;
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                flag.store(false, Ordering::SeqCst);
                debug!("Simulator thread exiting");
            })?;

        info!("Simulated autopilot {} running", lock(&autopilot).identity());
        Ok(Self {
            autopilot,
            running,
            thread_handle: Some(handle),
        })
    }

    /// Shared access for inspecting or reconfiguring the simulator
    pub fn autopilot(&self) -> Arc<Mutex<SimAutopilot>> {
        self.autopilot.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) -> GcsResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| GcsError::Channel("Simulator thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for SimRunner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Lock the simulator, ignoring poison from a panicked holder
pub fn lock(autopilot: &Mutex<SimAutopilot>) -> MutexGuard<'_, SimAutopilot> {
    autopilot.lock().unwrap_or_else(PoisonError::into_inner)
}
