//! Data source stage: synchronizes raw sensor events into packets.
//!
//! Sensor drivers fill the stage's input queue with interleaved IMU
//! samples and stereo frames through a [`DataSourceHandle`]. The stage
//! buffers IMU data and, for every frame, emits one [`SensorPacket`]
//! carrying the IMU window up to that frame's timestamp. The packet
//! then travels to the tracking stage through the callback the
//! pipeline registered.

use std::sync::Arc;

use tracing::debug;

use crate::imu::ImuSample;
use crate::system::module::StageWorker;
use crate::system::queue::ThreadsafeQueue;

use super::{SensorPacket, StereoFrame};

/// One raw event from a sensor driver.
#[derive(Debug, Clone)]
pub enum RawSensorEvent {
    Imu(ImuSample),
    Frame(StereoFrame),
}

/// Cheap cloneable handle external feeders use to push raw events.
/// Pushes are rejected (returning false) once the pipeline has shut
/// the queue down.
#[derive(Clone)]
pub struct DataSourceHandle {
    queue: Arc<ThreadsafeQueue<RawSensorEvent>>,
}

impl DataSourceHandle {
    pub fn new(queue: Arc<ThreadsafeQueue<RawSensorEvent>>) -> Self {
        Self { queue }
    }

    pub fn fill_imu(&self, sample: ImuSample) -> bool {
        self.queue.push(RawSensorEvent::Imu(sample))
    }

    pub fn fill_frame(&self, frame: StereoFrame) -> bool {
        self.queue.push(RawSensorEvent::Frame(frame))
    }
}

/// Stage worker: IMU/frame synchronization.
pub struct DataSourceStage {
    imu_buffer: Vec<ImuSample>,
    packets_produced: usize,
}

impl DataSourceStage {
    pub fn new() -> Self {
        Self {
            imu_buffer: Vec::new(),
            packets_produced: 0,
        }
    }
}

impl Default for DataSourceStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageWorker for DataSourceStage {
    type Input = RawSensorEvent;
    type Output = Arc<SensorPacket>;

    fn process(&mut self, event: RawSensorEvent) -> Option<Arc<SensorPacket>> {
        match event {
            RawSensorEvent::Imu(sample) => {
                self.imu_buffer.push(sample);
                None
            }
            RawSensorEvent::Frame(frame) => {
                // Window: everything measured up to the frame; later
                // samples stay buffered for the next packet.
                let split = self
                    .imu_buffer
                    .partition_point(|s| s.timestamp_ns <= frame.timestamp_ns);
                let window: Vec<ImuSample> = self.imu_buffer.drain(..split).collect();
                debug!(
                    timestamp_ns = frame.timestamp_ns,
                    imu_samples = window.len(),
                    "synchronized sensor packet"
                );
                self.packets_produced += 1;
                Some(SensorPacket::new(frame, window))
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.packets_produced > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn imu(timestamp_ns: u64) -> RawSensorEvent {
        RawSensorEvent::Imu(ImuSample {
            timestamp_ns,
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        })
    }

    fn frame(timestamp_ns: u64) -> RawSensorEvent {
        RawSensorEvent::Frame(StereoFrame {
            timestamp_ns,
            left: Default::default(),
            right: Default::default(),
            features: Vec::new(),
        })
    }

    #[test]
    fn test_imu_window_attached_to_frame() {
        let mut source = DataSourceStage::new();
        assert!(source.process(imu(10)).is_none());
        assert!(source.process(imu(20)).is_none());
        let packet = source.process(frame(25)).unwrap();
        assert_eq!(packet.timestamp_ns, 25);
        assert_eq!(packet.imu_window.len(), 2);
    }

    #[test]
    fn test_samples_after_frame_stay_buffered() {
        let mut source = DataSourceStage::new();
        source.process(imu(10));
        source.process(imu(30));
        let packet = source.process(frame(20)).unwrap();
        assert_eq!(packet.imu_window.len(), 1);
        // The t=30 sample belongs to the next packet.
        let next = source.process(frame(40)).unwrap();
        assert_eq!(next.imu_window.len(), 1);
        assert_eq!(next.imu_window[0].timestamp_ns, 30);
    }

    #[test]
    fn test_frame_without_imu_still_produces_packet() {
        let mut source = DataSourceStage::new();
        assert!(!source.is_initialized());
        let packet = source.process(frame(5)).unwrap();
        assert!(packet.imu_window.is_empty());
        assert!(source.is_initialized());
    }
}
