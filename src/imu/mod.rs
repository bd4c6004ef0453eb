pub mod sample;

pub use sample::{GRAVITY, ImuBias, ImuNoise, ImuSample};
