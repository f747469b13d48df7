//! Error plumbing shared across the workspace.
//!
//! - [`Location`] is captured implicitly by `snafu` context selectors, so
//!   every error knows where it was raised.
//! - [`Report`] renders an error together with its chain of sources.
//! - [`report`] turns an error that must never happen into a panic.
//! - [`GenericError`] (feature `alloc`) is a catch-all error for binaries and
//!   examples.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{boxed::Box, string::String};
use core::{error::Error, fmt};

use snafu::GenerateImplicitData;
#[cfg(feature = "alloc")]
use snafu::Snafu;

/// Source location an error was created at.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Location {
    /// Name of the source file.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    /// Line number in the source file.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

#[cfg(feature = "alloc")]
#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn Error>, Some)))]
    source: Option<Box<dyn Error>>,
}

#[cfg(feature = "alloc")]
impl GenericError {
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

/// Displays an error followed by its causes.
pub struct Report<E> {
    error: E,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

/// Panics with a rendered [`Report`] of `err`.
///
/// Used for conditions that indicate a bug in the caller and must stop
/// execution at the point of detection.
#[track_caller]
pub fn report<E>(err: E) -> !
where
    E: Error,
{
    let report = Report::new(err);
    panic!("Critical error occurred\n\n{report}");
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString as _;

    use snafu::{IntoError as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("inner failure"))]
    struct InnerError;

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failure"))]
    struct OuterError {
        source: InnerError,
        #[snafu(implicit)]
        location: Location,
    }

    #[test]
    fn test_report_lists_causes() {
        let err = OuterSnafu.into_error(InnerError);
        assert_eq!(err.location.file(), file!());

        let rendered = Report::new(err).to_string();
        assert!(rendered.starts_with("Error: outer failure\n"));
        assert!(rendered.contains("Caused by:\n   0: inner failure\n"));
    }

    #[test]
    #[should_panic = "Critical error occurred"]
    fn test_report_panics() {
        report(InnerError);
    }
}
