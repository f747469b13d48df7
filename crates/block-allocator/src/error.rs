use snafu::Snafu;
use snafu_utils::Location;

use crate::Handle;

/// Errors that can occur while binding storage to an allocator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("arena storage is empty"))]
    EmptyArena {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena of {size} bytes exceeds the addressable {max} bytes"))]
    ArenaTooLarge {
        size: usize,
        max: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("allocator already carved {items} items from its current arena"))]
    AlreadyInitialized {
        items: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl InitError {
    /// Where the error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::EmptyArena { location }
            | Self::ArenaTooLarge { location, .. }
            | Self::AlreadyInitialized { location, .. } => *location,
        }
    }
}

/// Invariant violations. These are never returned to the caller; they are
/// rendered into a panic at the point of detection.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Fault {
    #[snafu(display("double free of {handle} at {location}"))]
    DoubleFree {
        handle: Handle,
        #[snafu(implicit)]
        location: Location,
    },
}
