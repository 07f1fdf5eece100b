//! Mission-changed notification
//!
//! Tracks the signature of the mission believed to be on the vehicle and
//! tells subscribers when it changes. Subscribers live as long as the engine.

use gcslibgs::MissionSignature;
use log::{debug, info};

/// Subscriber invoked with the new signature
pub type MissionChangedCallback = Box<dyn FnMut(MissionSignature) + Send>;

#[derive(Default)]
pub struct MissionChangeNotifier {
    current: Option<MissionSignature>,
    subscribers: Vec<MissionChangedCallback>,
}

impl MissionChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: MissionChangedCallback) {
        self.subscribers.push(callback);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Last known signature
    pub fn current(&self) -> Option<MissionSignature> {
        self.current
    }

    /// Adopt a signature without notifying anyone
    pub fn record(&mut self, signature: MissionSignature) {
        self.current = Some(signature);
    }

    /// Adopt a signature and notify if it differs from the last one
    ///
    /// Returns whether subscribers were notified.
    pub fn changed(&mut self, signature: MissionSignature) -> bool {
        if self.current == Some(signature) {
            return false;
        }
        self.announce(signature);
        true
    }

    /// Adopt a signature the ground side just wrote and always notify
    ///
    /// Re-uploading the mission already on board still counts as a change.
    pub fn announce(&mut self, signature: MissionSignature) {
        info!(
            "Mission changed: {} items, checksum {:08x}",
            signature.count, signature.checksum
        );
        self.current = Some(signature);
        for subscriber in self.subscribers.iter_mut() {
            subscriber(signature);
        }
    }

    /// Signature broadcast by the vehicle on its own
    ///
    /// The first one only tells us what was already on board.
    pub fn observe_unsolicited(&mut self, signature: MissionSignature) -> bool {
        if self.current.is_none() {
            debug!("Seeding mission signature from vehicle broadcast");
            self.record(signature);
            return false;
        }
        self.changed(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sig(count: u16, checksum: u32) -> MissionSignature {
        MissionSignature { count, checksum }
    }

    fn counting() -> (MissionChangeNotifier, Arc<Mutex<Vec<MissionSignature>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = MissionChangeNotifier::new();
        for _ in 0..2 {
            let seen = seen.clone();
            notifier.subscribe(Box::new(move |s| seen.lock().unwrap().push(s)));
        }
        (notifier, seen)
    }

    #[test]
    fn test_first_broadcast_seeds() {
        let (mut notifier, seen) = counting();
        assert!(!notifier.observe_unsolicited(sig(3, 7)));
        assert_eq!(notifier.current(), Some(sig(3, 7)));
        assert!(!notifier.observe_unsolicited(sig(3, 7)));
        assert!(seen.lock().unwrap().is_empty());

        assert!(notifier.observe_unsolicited(sig(0, 0)));
        assert_eq!(*seen.lock().unwrap(), vec![sig(0, 0), sig(0, 0)]);
    }

    #[test]
    fn test_upload_fires_once_per_change() {
        let (mut notifier, seen) = counting();
        assert!(notifier.changed(sig(4, 99)));
        assert!(!notifier.observe_unsolicited(sig(4, 99)));
        assert!(!notifier.observe_unsolicited(sig(4, 99)));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_announce_fires_for_same_signature() {
        let (mut notifier, seen) = counting();
        notifier.observe_unsolicited(sig(4, 99));
        notifier.announce(sig(4, 99));
        notifier.announce(sig(4, 99));
        assert!(!notifier.observe_unsolicited(sig(4, 99)));
        assert_eq!(seen.lock().unwrap().len(), 4);
        assert_eq!(notifier.current(), Some(sig(4, 99)));
    }

    #[test]
    fn test_record_is_silent() {
        let (mut notifier, seen) = counting();
        notifier.record(sig(2, 5));
        assert!(!notifier.changed(sig(2, 5)));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(notifier.subscriber_count(), 2);
    }
}
