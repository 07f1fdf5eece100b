//! Link transport between the ground station and the vehicle
//!
//! Sending is fire-and-forget and never blocks the dispatch context.
//! Inbound frames are handed to a delivery function in receipt order.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gcslibgs::{Frame, GcsError, GcsResult};
use log::{debug, warn};

use crate::config::constants::{UDP_BUFFER_SIZE, UDP_POLL_INTERVAL};
use crate::config::UdpLinkConfig;

/// Outbound half of a link to the vehicle
pub trait Link: Send + Sync {
    /// Queue a frame for transmission without waiting for it to leave
    fn send(&self, frame: &Frame) -> GcsResult<()>;
}

/// In-process link over an mpsc channel
pub struct ChannelLink {
    tx: Sender<Frame>,
}

impl ChannelLink {
    pub fn new(tx: Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl Link for ChannelLink {
    fn send(&self, frame: &Frame) -> GcsResult<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| GcsError::Link("Peer end of channel closed".to_string()))
    }
}

/// UDP link to the vehicle
pub struct UdpLink {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl UdpLink {
    /// Bind the local address; frames are sent to the remote address
    pub fn bind(config: UdpLinkConfig) -> GcsResult<Self> {
        let socket = UdpSocket::bind(config.local_addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            remote_addr: config.remote_addr,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> GcsResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start the receive thread
    ///
    /// Every decoded frame is passed to `deliver`. The thread exits when
    /// `deliver` returns false, when the link is dropped, or on a socket
    /// error. Undecodable datagrams are logged and skipped.
    pub fn spawn_receiver<F>(&self, mut deliver: F) -> GcsResult<JoinHandle<()>>
    where
        F: FnMut(Frame) -> bool + Send + 'static,
    {
        // The clone shares the non-blocking flag with the send side.
        let socket = self.socket.try_clone()?;
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("gcs-udp-rx".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; UDP_BUFFER_SIZE];
                while running.load(Ordering::SeqCst) {
                    let (size, addr) = match socket.recv_from(&mut buffer) {
                        Ok(received) => received,
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(UDP_POLL_INTERVAL);
                            continue;
                        }
                        // ICMP feedback from an earlier send on some platforms
                        Err(ref e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                            ) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            warn!("UDP receive failed: {}", e);
                            break;
                        }
                    };

                    match Frame::from_bytes(&buffer[..size]) {
                        Ok(frame) => {
                            if !deliver(frame) {
                                debug!("Dispatch context gone, stopping UDP receiver");
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable datagram from {}: {}", addr, e),
                    }
                }
            })?;

        Ok(handle)
    }
}

impl Link for UdpLink {
    fn send(&self, frame: &Frame) -> GcsResult<()> {
        let data = frame.to_bytes()?;
        match self.socket.send_to(&data, self.remote_addr) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(GcsError::Link("Send buffer full".to_string()))
            }
            Err(e) => Err(GcsError::Io(e)),
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcslibgs::{Heartbeat, Message, PeerIdentity};
    use std::sync::mpsc;
    use std::time::Duration;

    fn heartbeat() -> Frame {
        Frame::new(PeerIdentity::new(1, 1), Message::Heartbeat(Heartbeat::autopilot()))
    }

    #[test]
    fn test_channel_link() {
        let (tx, rx) = mpsc::channel();
        let link = ChannelLink::new(tx);
        link.send(&heartbeat()).unwrap();
        assert_eq!(rx.recv().unwrap().sender, PeerIdentity::new(1, 1));

        drop(rx);
        assert!(matches!(link.send(&heartbeat()), Err(GcsError::Link(_))));
    }

    #[test]
    fn test_udp_link_loopback() {
        let a = UdpLink::bind(UdpLinkConfig::parse("127.0.0.1:0", "127.0.0.1:9").unwrap()).unwrap();
        let a_addr = a.local_addr().unwrap();
        let b = UdpLink::bind(UdpLinkConfig::new("127.0.0.1:0".parse().unwrap(), a_addr)).unwrap();

        let (tx, rx) = mpsc::channel();
        let _rx_thread = a
            .spawn_receiver(move |frame| tx.send(frame).is_ok())
            .unwrap();

        b.send(&heartbeat()).unwrap();
        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(frame.message, Message::Heartbeat(_)));
    }
}
