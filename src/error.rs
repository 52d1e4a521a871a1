use std::fmt;

/// A simple macro to report all kinds of errors.
macro_rules! e_fmt {
  ($($arg:tt)+) => {
      $crate::Error::Msg(format!($($arg)+))
  };
}

pub(crate) use e_fmt;

/// A basic error type from this library.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Like a classic EAGAIN. The receiver should retry.
    Again,

    /// A generic error message.
    Msg(String),

    /// A required service field was not given.
    MissingField(&'static str),

    /// Probing found the service instance name already claimed on the network.
    NameConflict(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Msg(s) => write!(f, "{}", s),
            Error::MissingField(field) => write!(f, "required {} not given", field),
            Error::NameConflict(fqdn) => {
                write!(f, "service name {} is already in use on the network", fqdn)
            }
            Error::Again => write!(f, "try again"),
        }
    }
}

impl std::error::Error for Error {}

/// One and only `Result` type from this library crate.
pub type Result<T> = core::result::Result<T, Error>;
