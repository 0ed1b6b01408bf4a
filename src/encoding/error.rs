//! Error type and Return values used by the Serialization.

use core::fmt::Display;

use serde::ser;

/// Represents all possible errors that can happen during Serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The value contains a type without a deterministic slot representation,
    /// for example floating point numbers.
    TypeNotRepresentable(&'static str),
    /// Sequences and maps must announce their length up front, because the
    /// length slot is written before the elements.
    UnknownLength,
    /// Raised by a `Serialize` implementation through [ser::Error::custom].
    Custom(String),
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::TypeNotRepresentable(type_name) => {
                f.write_str("type is not representable in slot encoding: ")?;
                f.write_str(type_name)
            }
            Error::UnknownLength => f.write_str("sequence length must be known in advance"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
