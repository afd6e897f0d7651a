use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by songs, catalogs and the migration runner.
#[derive(Debug, Error)]
pub enum SongError {
    /// Recoverable failure raised by a song. The executor logs it and moves on.
    #[error("user error: {message}")]
    User { message: Cow<'static, str> },

    /// Underlying database statement failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The migration descriptor is malformed or inconsistent.
    #[error("invalid migration descriptor: {message}")]
    Descriptor { message: String },

    /// The field snapshot CSV could not be read or written.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] csv::Error),

    /// An operation references a song that is not registered.
    #[error("unknown song '{name}'")]
    UnknownSong { name: String },

    /// A shell operation exited unsuccessfully.
    #[error("command `{program}` failed with status {status}: {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },

    /// Song settings or the run environment are inconsistent.
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl SongError {
    /// Build a soft error.
    pub fn user(message: impl Into<Cow<'static, str>>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::Descriptor {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the executor may log this error and continue with the next step.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

pub type SongResult<T> = Result<T, SongError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_user_errors_are_soft() {
        assert!(SongError::user("refused").is_soft());
        assert!(!SongError::other("boom").is_soft());
        assert!(!SongError::descriptor("bad").is_soft());
        assert!(
            !SongError::UnknownSong {
                name: "x".to_string()
            }
            .is_soft()
        );
    }

    #[test]
    fn command_error_message() {
        let err = SongError::Command {
            program: "odoo".to_string(),
            status: 2,
            stderr: "no such module".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command `odoo` failed with status 2: no such module"
        );
    }
}
