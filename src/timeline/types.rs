use thiserror::Error;

pub type Result<T> = std::result::Result<T, TimelineError>;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Malformed timeline: {reason}")]
    Malformed { reason: String },

    /// `unit` says whether `position` and `end` are byte offsets or times.
    #[error("Timeline exhausted: {unit} {position} is at or past the end ({end})")]
    Exhausted {
        unit: &'static str,
        position: u64,
        end: u64,
    },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Record payload of {len} bytes exceeds the u32 length field")]
    RecordTooLarge { len: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl TimelineError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        TimelineError::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_query(reason: impl Into<String>) -> Self {
        TimelineError::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        TimelineError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// True when a positional read ran past the last record.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TimelineError::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_is_distinguishable() {
        let err = TimelineError::Exhausted {
            unit: "byte",
            position: 40,
            end: 40,
        };
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("byte 40"));
        assert!(!TimelineError::malformed("bad magic").is_exhausted());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: TimelineError = io.into();
        assert!(matches!(err, TimelineError::Io(_)));
        assert!(err.to_string().contains("short read"));
    }
}
