//! Stream versioning and global log positions.
//!
//! Two counters drive the whole system:
//!
//! - [`Version`]: how many events an aggregate stream holds. Used for
//!   optimistic concurrency when appending.
//! - [`Position`]: the commit log's global, strictly monotonic sequence. Used by
//!   projections to track progress across every stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event version number for optimistic concurrency control.
///
/// Versions start at 0 (empty stream) and increment by 1 for each event
/// appended to a stream. The version of a single event is its 1-based position
/// within the stream.
///
/// # Examples
///
/// ```
/// use eventide_core::stream::Version;
///
/// let v0 = Version::new(0);
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
///
/// let v5 = Version::new(5);
/// assert_eq!(v5.value(), 5);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The initial version (0) of a stream that holds no events.
    pub const INITIAL: Self = Self(0);

    /// Highest representable version, used as an open upper bound.
    pub const MAX: Self = Self(u64::MAX);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub<u64> for Version {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

/// Global position of a chunk in the commit log.
///
/// Assigned by the store on append. Positions are strictly increasing across
/// all partitions; `Position::ZERO` means "nothing dispatched yet".
///
/// ```
/// use eventide_core::stream::Position;
///
/// let start = Position::ZERO;
/// assert_eq!(start.next(), Position::new(1));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(u64);

impl Position {
    /// Position before the first chunk.
    pub const ZERO: Self = Self(0);

    /// Create a position from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw position value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod version_tests {
        use super::*;

        #[test]
        fn initial_version() {
            assert_eq!(Version::INITIAL, Version::new(0));
            assert!(Version::INITIAL.is_initial());
            assert!(!Version::new(1).is_initial());
        }

        #[test]
        fn next_version() {
            let v1 = Version::new(0).next();
            assert_eq!(v1, Version::new(1));
            assert_eq!(v1.next(), Version::new(2));
        }

        #[test]
        fn version_arithmetic() {
            let v5 = Version::new(5);
            assert_eq!(v5 + 3, Version::new(8));
            assert_eq!(v5 - 2, Version::new(3));
        }

        #[test]
        fn version_ordering() {
            assert!(Version::new(1) < Version::new(2));
            assert!(Version::MAX > Version::new(u64::MAX - 1));
        }

        #[test]
        fn version_from_u64() {
            let version = Version::from(42_u64);
            let num: u64 = version.into();
            assert_eq!(num, 42);
            assert_eq!(format!("{version}"), "42");
        }
    }

    mod position_tests {
        use super::*;

        #[test]
        fn zero_is_default() {
            assert_eq!(Position::default(), Position::ZERO);
            assert_eq!(Position::ZERO.next().value(), 1);
        }

        #[test]
        fn ordering_and_display() {
            assert!(Position::new(3) > Position::new(2));
            assert_eq!(Position::new(7).to_string(), "7");
        }
    }
}
