use std::error;
use std::fmt;

/// Classifies a failure on the checkpoint stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoErrorKind {
    ShortRead,
    ShortWrite,
    Seek,
    Other,
}

#[derive(Debug)]

/**
 * Error to represent a fatal condition raised while building, restarting, or
 * advancing a mesh.
 */
pub enum Error {
    /// Invalid or inconsistent input, detected before any block is built.
    Config(String),

    /// The block tree or a neighbor table is inconsistent.
    Structure(String),

    /// A checkpoint stream failed to deliver or accept a record.
    Io {
        kind: IoErrorKind,
        context: String,
        source: Option<std::io::Error>,
    },

    /// A task list can never complete on some block.
    Deadlock { gid: usize, task: String },

    /// The message-passing layer failed.
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }

    pub fn structure<S: Into<String>>(message: S) -> Self {
        Error::Structure(message.into())
    }

    pub fn io<S: Into<String>>(kind: IoErrorKind, context: S, source: std::io::Error) -> Self {
        Error::Io {
            kind,
            context: context.into(),
            source: Some(source),
        }
    }

    pub fn short_read<S: Into<String>>(context: S) -> Self {
        Error::Io {
            kind: IoErrorKind::ShortRead,
            context: context.into(),
            source: None,
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Error::Transport(message.into())
    }

    /// Return the I/O kind if this is a checkpoint error.
    pub fn io_kind(&self) -> Option<IoErrorKind> {
        match self {
            Error::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Config(msg) => write!(fmt, "configuration error: {}", msg),
            Structure(msg) => write!(fmt, "mesh structure is broken: {}", msg),
            Io {
                kind,
                context,
                source: Some(e),
            } => write!(fmt, "checkpoint {:?} while {}: {}", kind, context, e),
            Io { kind, context, .. } => write!(fmt, "checkpoint {:?} while {}", kind, context),
            Deadlock { gid, task } => write!(
                fmt,
                "task list on block {} can never complete (stuck before task '{}')",
                gid, task
            ),
            Transport(msg) => write!(fmt, "transport error: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io {
                source: Some(e), ..
            } => Some(e),
            _ => None,
        }
    }
}
