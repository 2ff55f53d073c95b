/// Tracking state of a single marker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// No history: never seen, or lost after too many predictions
    #[default]
    Undetected,
    /// Latest sample came from a detection
    Trusted,
    /// Latest sample was extrapolated while the marker was not visible
    Predicted,
}
