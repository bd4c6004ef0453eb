//! CSV sensor recordings.
//!
//! Reads EuRoC-style comma-separated sensor logs: an IMU file with
//! `timestamp [ns], w_xyz, a_xyz` rows and a frame index with
//! `timestamp [ns], filename` rows. Header lines starting with `#` are
//! skipped. Frames load without pixel data or features; a recording
//! replay therefore exercises the IMU-only tracking path.

use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use nalgebra::Vector3;

use crate::imu::ImuSample;
use crate::sensor::source::RawSensorEvent;
use crate::sensor::{ImageFrame, StereoFrame};

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn field<T: std::str::FromStr>(record: &csv::StringRecord, index: usize) -> Result<T> {
    let raw = record
        .get(index)
        .with_context(|| format!("missing field {} in record", index))?;
    raw.parse::<T>()
        .ok()
        .with_context(|| format!("invalid value {:?} in field {}", raw, index))
}

/// Load an IMU log: `timestamp_ns, w_x, w_y, w_z, a_x, a_y, a_z`.
pub fn load_imu_csv(path: impl AsRef<Path>) -> Result<Vec<ImuSample>> {
    let mut samples = Vec::new();
    for record in reader(path.as_ref())?.records() {
        let record = record?;
        samples.push(ImuSample {
            timestamp_ns: field(&record, 0)?,
            gyro: Vector3::new(field(&record, 1)?, field(&record, 2)?, field(&record, 3)?),
            accel: Vector3::new(field(&record, 4)?, field(&record, 5)?, field(&record, 6)?),
        });
    }
    Ok(samples)
}

/// Load a frame index: `timestamp_ns, filename`. Only timestamps are
/// carried into the pipeline; image decoding belongs to the external
/// vision frontend.
pub fn load_frame_index(path: impl AsRef<Path>) -> Result<Vec<u64>> {
    let mut timestamps = Vec::new();
    for record in reader(path.as_ref())?.records() {
        let record = record?;
        timestamps.push(field(&record, 0)?);
    }
    Ok(timestamps)
}

/// Merge an IMU log and a frame index into one timestamp-ordered event
/// sequence. Both inputs must already be sorted; frames win timestamp
/// ties so a same-stamp IMU sample lands in the following packet's
/// window.
pub fn load_events(
    imu_csv: impl AsRef<Path>,
    frames_csv: impl AsRef<Path>,
) -> Result<Vec<RawSensorEvent>> {
    let imu = load_imu_csv(imu_csv)?;
    let frames = load_frame_index(frames_csv)?;
    if !imu.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns) {
        bail!("IMU log is not sorted by timestamp");
    }
    if !frames.windows(2).all(|w| w[0] <= w[1]) {
        bail!("frame index is not sorted by timestamp");
    }

    let mut events = Vec::with_capacity(imu.len() + frames.len());
    let mut imu_iter = imu.into_iter().peekable();
    for frame_ts in frames {
        while imu_iter
            .peek()
            .is_some_and(|s| s.timestamp_ns < frame_ts)
        {
            if let Some(sample) = imu_iter.next() {
                events.push(RawSensorEvent::Imu(sample));
            }
        }
        events.push(RawSensorEvent::Frame(StereoFrame {
            timestamp_ns: frame_ts,
            left: ImageFrame::default(),
            right: ImageFrame::default(),
            features: Vec::new(),
        }));
    }
    events.extend(imu_iter.map(RawSensorEvent::Imu));
    Ok(events)
}
