pub mod cell;
pub mod telemetry;

pub use cell::LatestCell;
