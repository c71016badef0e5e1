use thiserror::Error;

use crate::dispatch::Throwable;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// Builds a [`crate::Error::StructuralViolation`] for a class (and optionally one of its
/// methods).
///
/// ```rust, ignore
/// return Err(structural_error!("pkg/Foo", "<init>()V", "no super call in {}", name));
/// ```
macro_rules! structural_error {
    ($class:expr, $method:expr, $msg:expr) => {
        crate::Error::StructuralViolation {
            location: crate::error::location($class, Some($method)),
            message: $msg.to_string(),
        }
    };

    ($class:expr, $method:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::StructuralViolation {
            location: crate::error::location($class, Some($method)),
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Renders the location of a structural violation as `class` or `class.method`.
pub(crate) fn location(class: &str, method: Option<&str>) -> String {
    match method {
        Some(method) if !method.is_empty() => format!("{class}.{method}"),
        _ => class.to_string(),
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups, mirroring the phases a class goes through inside a
/// sandbox:
///
/// ## Loading
/// - [`Error::NotFound`] - the byte supplier has no original bytes for a class
/// - [`Error::ResourceExhaustion`] - the rewritten class could not be allocated
///
/// ## Decoding and rewriting
/// - [`Error::Malformed`] - the class file is corrupted or truncated
/// - [`Error::OutOfBounds`] - a read ran past the end of the buffer
/// - [`Error::StructuralViolation`] - the compiled shape of a class breaks an assumption the
///   rewriter relies on (no super-constructor call, unsupported intercepted return type, ...)
///
/// ## Dispatch
/// - [`Error::Thrown`] - a throwable raised by original or substitute code, already cleaned of
///   dispatch frames
/// - [`Error::NotConfigured`] - a dispatch hook was reached before the sandbox was configured
///
/// None of these are retried by the library; a class that failed to load fails the same way
/// on the next attempt.
///
/// # Examples
///
/// ```rust,no_run
/// use shadowbox::{Error, sandbox::Sandbox};
///
/// fn load(sandbox: &Sandbox) {
///     match sandbox.acquire("pkg.a.Widget") {
///         Ok(class) => println!("loaded {}", class.name()),
///         Err(Error::NotFound(name)) => eprintln!("no bytes for {name}"),
///         Err(Error::StructuralViolation { location, message }) => {
///             eprintln!("cannot rewrite {location}: {message}")
///         }
///         Err(e) => eprintln!("other error: {e}"),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the class file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The original bytes of a class could not be located.
    ///
    /// Terminal for that class: the loader does not retry or fall back to another supplier
    /// once the configured one reported the class as missing.
    #[error("Class not found - {0}")]
    NotFound(String),

    /// A compiled-shape assumption was violated while rewriting a class.
    ///
    /// Examples are a constructor without a recognizable super-constructor call, an
    /// intercepted call whose return type cannot be unpacked, or a constant pool that would
    /// overflow. Fatal for the class, never retried.
    #[error("Structural violation in {location}: {message}")]
    StructuralViolation {
        /// `internal/ClassName` or `internal/ClassName.method(desc)`
        location: String,
        /// What went wrong
        message: String,
    },

    /// A throwable raised by original or substitute code.
    ///
    /// The throwable has passed through the stack trace cleaner at the dispatch boundary:
    /// its type and message are exactly what the raising code produced, only dispatch
    /// frames have been removed.
    #[error("{0}")]
    Thrown(Throwable),

    /// Allocation failed while defining a rewritten class.
    #[error("Resource exhaustion while defining {class}: {message}")]
    ResourceExhaustion {
        /// Binary name of the class being defined
        class: String,
        /// Allocator diagnostic
        message: String,
    },

    /// A dispatch hook was invoked on a namespace that has no runtime bound to it.
    #[error("Sandbox not configured - {0}")]
    NotConfigured(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised by directory byte suppliers or the class dump
    /// directory.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A policy pattern is not a valid regular expression.
    #[error("Invalid pattern - {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Failed to lock target.
    ///
    /// A lock guarding shared sandbox state was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Returns the throwable carried by [`Error::Thrown`], if any.
    #[must_use]
    pub fn throwable(&self) -> Option<&Throwable> {
        match self {
            Error::Thrown(throwable) => Some(throwable),
            _ => None,
        }
    }
}

impl From<Throwable> for Error {
    fn from(value: Throwable) -> Self {
        Error::Thrown(value)
    }
}
