//! Synthetic stereo-inertial sequence generator.
//!
//! Produces a circular flight with consistent IMU measurements and a
//! ring of landmarks observed from nearby poses. Useful for driving
//! the pipeline end to end without a recorded dataset; with
//! deterministic seeding the generated sequence is identical across
//! runs.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::imu::{GRAVITY, ImuNoise, ImuSample};
use crate::sensor::source::{DataSourceStage, RawSensorEvent};
use crate::sensor::{ImageFrame, LandmarkId, SensorPacket, StereoFeature, StereoFrame};
use crate::system::module::StageWorker;

/// Seed used when deterministic generation is requested.
const DETERMINISTIC_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub duration_s: f64,
    pub frame_rate_hz: f64,
    pub imu_rate_hz: f64,
    /// Radius of the circular trajectory (m).
    pub radius_m: f64,
    /// Angular speed along the circle (rad/s).
    pub angular_speed_rad_s: f64,
    pub landmark_count: usize,
    /// Landmarks within this distance of the body are observed (m).
    pub observation_radius_m: f64,
    pub imu_noise: ImuNoise,
    /// Add measurement noise at all (off for exactly repeatable,
    /// noise-free sequences in tests).
    pub with_noise: bool,
    pub deterministic_seed: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration_s: 10.0,
            frame_rate_hz: 10.0,
            imu_rate_hz: 200.0,
            radius_m: 5.0,
            angular_speed_rad_s: 0.5,
            landmark_count: 64,
            observation_radius_m: 6.0,
            imu_noise: ImuNoise::default(),
            with_noise: true,
            deterministic_seed: false,
        }
    }
}

/// A fully generated event sequence, timestamp-ordered.
pub struct SyntheticDataset {
    events: Vec<RawSensorEvent>,
    frame_count: usize,
}

impl SyntheticDataset {
    pub fn generate(config: &SyntheticConfig) -> Self {
        let mut rng = if config.deterministic_seed {
            StdRng::seed_from_u64(DETERMINISTIC_SEED)
        } else {
            StdRng::from_entropy()
        };

        let landmarks = Self::landmark_ring(config);
        let mut events = Vec::new();
        let mut frame_count = 0;

        let imu_step_ns = (1e9 / config.imu_rate_hz) as u64;
        let frame_step_ns = (1e9 / config.frame_rate_hz) as u64;
        let end_ns = (config.duration_s * 1e9) as u64;

        let mut next_imu_ns = 0u64;
        let mut next_frame_ns = 0u64;
        while next_imu_ns <= end_ns || next_frame_ns <= end_ns {
            // Emit whichever event is due first; frames win ties so a
            // packet's window never includes a same-timestamp sample
            // from the next interval.
            if next_frame_ns <= next_imu_ns && next_frame_ns <= end_ns {
                events.push(RawSensorEvent::Frame(Self::frame_at(
                    next_frame_ns,
                    config,
                    &landmarks,
                )));
                frame_count += 1;
                next_frame_ns += frame_step_ns;
            } else if next_imu_ns <= end_ns {
                events.push(RawSensorEvent::Imu(Self::imu_at(
                    next_imu_ns,
                    config,
                    &mut rng,
                )));
                next_imu_ns += imu_step_ns;
            } else {
                break;
            }
        }

        Self {
            events,
            frame_count,
        }
    }

    /// Body position on the circle at time t.
    fn position_at(t_s: f64, config: &SyntheticConfig) -> Vector3<f64> {
        let angle = config.angular_speed_rad_s * t_s;
        Vector3::new(
            config.radius_m * angle.cos(),
            config.radius_m * angle.sin(),
            0.0,
        )
    }

    fn imu_at(timestamp_ns: u64, config: &SyntheticConfig, rng: &mut StdRng) -> ImuSample {
        let t_s = timestamp_ns as f64 * 1e-9;
        let angle = config.angular_speed_rad_s * t_s;
        let centripetal = config.radius_m * config.angular_speed_rad_s.powi(2);
        // World acceleration of the circular motion; the body keeps
        // identity orientation, so the measured specific force is
        // world acceleration minus gravity.
        let accel_world = Vector3::new(-centripetal * angle.cos(), -centripetal * angle.sin(), 0.0);
        let mut accel = accel_world - GRAVITY;
        let mut gyro = Vector3::zeros();
        if config.with_noise {
            accel += Self::noise_vector(rng, config.imu_noise.sigma_accel);
            gyro += Self::noise_vector(rng, config.imu_noise.sigma_gyro);
        }
        ImuSample {
            timestamp_ns,
            accel,
            gyro,
        }
    }

    fn frame_at(
        timestamp_ns: u64,
        config: &SyntheticConfig,
        landmarks: &[Vector3<f64>],
    ) -> StereoFrame {
        let t_s = timestamp_ns as f64 * 1e-9;
        let position = Self::position_at(t_s, config);
        let features = landmarks
            .iter()
            .enumerate()
            .filter(|(_, lm)| (*lm - position).norm() <= config.observation_radius_m)
            .map(|(i, lm)| {
                // Identity body orientation: camera frame is a pure
                // translation of the world frame.
                let point_cam = lm - position;
                StereoFeature {
                    landmark_id: LandmarkId(i as u64),
                    pixel: (point_cam.x as f32, point_cam.y as f32),
                    point_cam,
                }
            })
            .collect();
        StereoFrame {
            timestamp_ns,
            left: ImageFrame::default(),
            right: ImageFrame::default(),
            features,
        }
    }

    fn noise_vector(rng: &mut StdRng, sigma: f64) -> Vector3<f64> {
        if sigma <= 0.0 {
            return Vector3::zeros();
        }
        Vector3::new(
            rng.gen_range(-sigma..sigma),
            rng.gen_range(-sigma..sigma),
            rng.gen_range(-sigma..sigma),
        )
    }

    /// Landmarks on a wider ring around the trajectory circle.
    fn landmark_ring(config: &SyntheticConfig) -> Vec<Vector3<f64>> {
        (0..config.landmark_count)
            .map(|i| {
                let angle = i as f64 / config.landmark_count as f64 * std::f64::consts::TAU;
                Vector3::new(
                    (config.radius_m + 1.0) * angle.cos(),
                    (config.radius_m + 1.0) * angle.sin(),
                    1.0,
                )
            })
            .collect()
    }

    pub fn events(&self) -> &[RawSensorEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<RawSensorEvent> {
        self.events
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Pre-synchronized packets, as the data source stage would emit
    /// them. Convenient for driving `spin_once` directly.
    pub fn packets(&self) -> Vec<SensorPacket> {
        let mut source = DataSourceStage::new();
        self.events
            .iter()
            .filter_map(|event| source.process(event.clone()))
            .map(|packet| (*packet).clone())
            .collect()
    }
}
