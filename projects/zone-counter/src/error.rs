use crate::zones::ZoneId;

/// Configuration errors reported synchronously to callers of the zone operations.
/// The registry is left untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    #[error("zone polygon needs at least 3 points, got {0}")]
    InvalidPolygon(usize),

    #[error("zone {0} not found")]
    NotFound(ZoneId),

    #[error("zone {0} already exists")]
    AlreadyExists(ZoneId),
}
