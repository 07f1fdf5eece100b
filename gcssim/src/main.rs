//! GCS Autopilot Simulator (gcssim)
//!
//! Serves a simulated autopilot over UDP. Heartbeats go to the configured
//! ground address until a ground station talks to us; after that, to
//! whoever spoke last.
//!
//! Usage: gcssim [config.json]

use std::env;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcslibgs::{Frame, GcsError, GcsResult, MAX_FRAME_SIZE};
use gcssim::{SimAutopilot, SimConfig};
use log::{error, info, warn};

/// How long a receive may block before heartbeats and the stop flag are checked
const READ_TIMEOUT: Duration = Duration::from_millis(20);

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match SimConfig::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    error!("Error loading configuration: {}", e);
                    process::exit(1);
                }
            }
        }
        None => SimConfig::default(),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        error!("Error setting Ctrl+C handler: {}", e);
        process::exit(1);
    }

    if let Err(e) = serve(config, &running) {
        error!("Simulator failed: {}", e);
        process::exit(1);
    }
    info!("GCSSim shutdown complete");
}

fn serve(config: SimConfig, running: &AtomicBool) -> GcsResult<()> {
    let socket = UdpSocket::bind(&config.listen_addr)?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut ground: SocketAddr = config
        .ground_addr
        .parse()
        .map_err(|e| GcsError::Config(format!("Invalid ground address: {}", e)))?;
    let interval = Duration::from_millis(config.heartbeat_interval_ms.max(1));

    let mut sim = SimAutopilot::new(config);
    info!(
        "Autopilot {} listening on {}",
        sim.identity(),
        socket.local_addr()?
    );

    let mut buffer = vec![0u8; MAX_FRAME_SIZE];
    let mut next_beat = Instant::now();
    while running.load(Ordering::SeqCst) {
        if Instant::now() >= next_beat {
            send_frame(&socket, &sim.heartbeat(), ground);
            send_frame(&socket, &sim.mission_current(), ground);
            next_beat = Instant::now() + interval;
        }

        let (size, addr) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(ref e) if is_transient(e) => continue,
            Err(e) => return Err(e.into()),
        };
        let frame = match Frame::from_bytes(&buffer[..size]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable datagram from {}: {}", addr, e);
                continue;
            }
        };
        if addr != ground {
            info!("Ground station at {}", addr);
            ground = addr;
        }

        for reply in sim.handle(frame) {
            send_frame(&socket, &reply, addr);
        }
    }
    Ok(())
}

/// Timeouts, plus ICMP errors some platforms report for earlier sends
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

fn send_frame(socket: &UdpSocket, frame: &Frame, addr: SocketAddr) {
    let result = frame
        .to_bytes()
        .and_then(|data| socket.send_to(&data, addr).map_err(GcsError::from));
    if let Err(e) = result {
        warn!("Failed to send to {}: {}", addr, e);
    }
}
