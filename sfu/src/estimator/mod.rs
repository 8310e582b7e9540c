pub mod jitter;
pub mod rate;

pub use jitter::JitterEstimator;
pub use rate::RateEstimator;
