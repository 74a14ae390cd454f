use thiserror::Error;

/// Failures surfaced by zone-graph construction and equivalence checking.
/// Inconsistent zones are not errors; they simply prune the path that
/// produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The watchdog cancelled a running check.
    #[error("operation timed out")]
    Timeout,

    /// The initial zone violates the initial location's invariant.
    #[error("initial zone violates the invariant of the initial location")]
    EmptyInitialZone,

    /// A zone vector whose length does not match the automaton dimension.
    #[error("zone has dimension {found} but the automaton requires {expected}")]
    DimensionMismatch { expected: u16, found: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
