use std::{error::Error, fmt, io};

/// The batch manager's result type.
pub type Result<T> = std::result::Result<T, BatchErr>;

/// Failures surfaced by a batch manager.
///
/// Every variant except `Io` is detected locally, before any collective
/// operation is issued, so the output vector is never partially written.
#[derive(Debug)]
pub enum BatchErr {
    /// The input and output vectors have different lengths.
    DimensionMismatch { input: usize, output: usize },
    /// Two partitioned vectors have a different amount of blocks.
    BlockCountMismatch { input: usize, output: usize },
    /// A pair of blocks of two partitioned vectors have different lengths.
    BlockDimensionMismatch {
        block: usize,
        input: usize,
        output: usize,
    },
    /// The workers of the group are not reducing vectors of the same length.
    DimensionDisagreement { local: usize, min: usize, max: usize },
    /// The workers of the group split their vectors in blocks of different lengths.
    BlockLayoutDisagreement,
    /// Another worker of the group rejected its vectors during local validation.
    PeerValidationFailed,
    /// A vector doesn't expose the storage the adapter is specialized for.
    RepresentationMismatch { side: &'static str },
    /// The batch configuration could not be loaded.
    InvalidConfig(String),
    /// A failure of the underlying collective provider.
    Io(io::Error),
}

impl fmt::Display for BatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchErr::DimensionMismatch { input, output } => write!(
                f,
                "dimension mismatch: input has {input} elements, output has {output}"
            ),
            BatchErr::BlockCountMismatch { input, output } => write!(
                f,
                "block count mismatch: input has {input} blocks, output has {output}"
            ),
            BatchErr::BlockDimensionMismatch {
                block,
                input,
                output,
            } => write!(
                f,
                "dimension mismatch in block {block}: input has {input} elements, output has {output}"
            ),
            BatchErr::DimensionDisagreement { local, min, max } => write!(
                f,
                "workers disagree on the vector length: local {local}, group range [{min}, {max}]"
            ),
            BatchErr::BlockLayoutDisagreement => {
                f.write_str("workers disagree on the block layout of their vectors")
            }
            BatchErr::PeerValidationFailed => {
                f.write_str("another worker of the group rejected its vectors")
            }
            BatchErr::RepresentationMismatch { side } => {
                write!(f, "the {side} vector doesn't expose contiguous storage")
            }
            BatchErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            BatchErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for BatchErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BatchErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BatchErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for BatchErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<BatchErr> for io::Error {
    fn from(value: BatchErr) -> Self {
        match value {
            BatchErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_names_both_lengths() {
        let err = BatchErr::DimensionMismatch {
            input: 4,
            output: 5,
        };

        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn test_io_errors_keep_their_source() {
        let err = BatchErr::from(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));

        assert!(err.source().is_some());
        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_local_errors_become_invalid_input() {
        let err: io::Error = BatchErr::RepresentationMismatch { side: "output" }.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
