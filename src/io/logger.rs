//! CSV trajectory logging for estimation output.

use std::fs::File;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use crate::estimation::EstimationOutput;

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    timestamp_ns: u64,
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
    vx: f64,
    vy: f64,
    vz: f64,
}

/// Writes one CSV row per estimated keyframe pose.
///
/// Wired as an estimation output callback when trajectory logging is
/// enabled, so it must tolerate being called from the estimation
/// stage's execution context.
pub struct TrajectoryLogger {
    writer: Mutex<csv::Writer<File>>,
}

impl TrajectoryLogger {
    pub fn create(path: &Path) -> Result<Self, csv::Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = csv::Writer::from_path(path)?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn log_pose(&self, output: &EstimationOutput) -> Result<(), csv::Error> {
        let q = output.pose.rotation.quaternion();
        let row = TrajectoryRow {
            timestamp_ns: output.timestamp_ns,
            x: output.pose.translation.x,
            y: output.pose.translation.y,
            z: output.pose.translation.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
            vx: output.velocity.x,
            vy: output.velocity.y,
            vz: output.velocity.z,
        };
        let mut writer = self.writer.lock();
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}
