//! Dataset playback: streams raw sensor events the way a driver
//! thread would deliver them.

use std::thread;

use crossbeam_channel::{Receiver, bounded};
use tracing::debug;

use crate::sensor::source::RawSensorEvent;

/// Capacity of the playback channel; a slow consumer backpressures
/// the player thread instead of buffering the whole dataset.
const PLAYBACK_CHANNEL_CAPACITY: usize = 64;

/// Replays a timestamp-ordered event sequence on a background thread.
pub struct DatasetPlayer {
    events: Vec<RawSensorEvent>,
}

impl DatasetPlayer {
    pub fn new(events: Vec<RawSensorEvent>) -> Self {
        Self { events }
    }

    /// Start playback. The returned channel yields events in order and
    /// closes when the sequence ends (or the receiver is dropped).
    pub fn stream(self) -> Receiver<RawSensorEvent> {
        let (sender, receiver) = bounded(PLAYBACK_CHANNEL_CAPACITY);
        thread::spawn(move || {
            let total = self.events.len();
            for event in self.events {
                if sender.send(event).is_err() {
                    debug!("playback receiver dropped, stopping player");
                    return;
                }
            }
            debug!(events = total, "dataset playback complete");
        });
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::ImuSample;
    use nalgebra::Vector3;

    fn imu(timestamp_ns: u64) -> RawSensorEvent {
        RawSensorEvent::Imu(ImuSample {
            timestamp_ns,
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        })
    }

    #[test]
    fn test_stream_yields_all_events_in_order() {
        let player = DatasetPlayer::new((0..200).map(imu).collect());
        let receiver = player.stream();
        let mut last = None;
        let mut count = 0;
        for event in receiver.iter() {
            let RawSensorEvent::Imu(sample) = event else {
                panic!("unexpected event kind");
            };
            if let Some(prev) = last {
                assert!(sample.timestamp_ns > prev);
            }
            last = Some(sample.timestamp_ns);
            count += 1;
        }
        assert_eq!(count, 200);
    }

    #[test]
    fn test_channel_closes_after_playback() {
        let player = DatasetPlayer::new(vec![imu(0)]);
        let receiver = player.stream();
        assert!(receiver.recv().is_ok());
        assert!(receiver.recv().is_err());
    }
}
