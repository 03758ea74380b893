// Counting zones: polygon geometry, occupancy state machine and the shared registry

pub mod geometry;
pub mod occupancy;
pub mod registry;

/// Zone identifier, assigned by the caller or auto-incremented by the registry.
pub type ZoneId = u32;

pub use geometry::ZonePoint;
pub use occupancy::TrackId;
pub use registry::{StatsSnapshot, ZoneCounts, ZoneRegistry, ZoneSpec, ZoneStats, ZoneUpdate, ZoneView};
