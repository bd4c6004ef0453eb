//! Sensor data model: synchronized camera/IMU packets and the data
//! source stage that produces them.
//!
//! Feature extraction and image decoding belong to the external vision
//! frontend; a [`StereoFrame`] arrives with its sparse stereo features
//! already attached and the pipeline only moves them around.

pub mod source;

use std::sync::Arc;

use nalgebra::Vector3;

use crate::imu::ImuSample;

pub use source::{DataSourceHandle, DataSourceStage, RawSensorEvent};

/// Identifier of a landmark observed across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LandmarkId(pub u64);

/// A stereo feature handed over by the external vision frontend:
/// pixel location in the left image plus the triangulated point in the
/// camera frame.
#[derive(Debug, Clone, Copy)]
pub struct StereoFeature {
    pub landmark_id: LandmarkId,
    pub pixel: (f32, f32),
    pub point_cam: Vector3<f64>,
}

/// Raw image buffer. May be empty when the producer streams features
/// only (the pipeline never looks inside).
#[derive(Debug, Clone, Default)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A time-aligned stereo image pair with its extracted features.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub timestamp_ns: u64,
    pub left: ImageFrame,
    pub right: ImageFrame,
    pub features: Vec<StereoFeature>,
}

/// A synchronized sensor packet: one stereo frame plus the IMU window
/// since the previous frame. Immutable once produced.
#[derive(Debug, Clone)]
pub struct SensorPacket {
    pub timestamp_ns: u64,
    pub frame: StereoFrame,
    pub imu_window: Vec<ImuSample>,
}

impl SensorPacket {
    pub fn new(frame: StereoFrame, imu_window: Vec<ImuSample>) -> Arc<Self> {
        Arc::new(Self {
            timestamp_ns: frame.timestamp_ns,
            frame,
            imu_window,
        })
    }
}
