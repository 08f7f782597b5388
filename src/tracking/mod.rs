//! Live execution tracking: GPS ingestion, visit/route state machines, ETA
//! projection and delay detection.

pub mod delay;
pub mod eta;
pub mod location;
pub mod route_tracker;

pub use delay::DelayDetector;
pub use eta::EtaCalculator;
pub use location::LocationTracker;
pub use route_tracker::RouteTracker;
