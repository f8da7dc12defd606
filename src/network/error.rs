use thiserror::Error;

use crate::raft::NodeId;

/// Every variant means the frame is malformed: the caller drops it and logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed message: frame needs {required} bytes, buffer holds {available}")]
    Truncated { required: usize, available: usize },

    #[error("malformed message: expected template {expected}, got {actual}")]
    TemplateMismatch { expected: u16, actual: u16 },

    #[error("malformed message: unknown template {0}")]
    UnknownTemplate(u16),

    #[error("malformed message: expected schema {expected}, got {actual}")]
    SchemaMismatch { expected: u16, actual: u16 },

    #[error("malformed message: block length {declared} shorter than {required}")]
    BlockTooShort { declared: u16, required: u16 },
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("Peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("Consensus runtime has shut down")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_read_as_malformed() {
        let errors = [
            CodecError::Truncated {
                required: 17,
                available: 3,
            },
            CodecError::TemplateMismatch {
                expected: 2,
                actual: 1,
            },
            CodecError::UnknownTemplate(99),
            CodecError::SchemaMismatch {
                expected: 5,
                actual: 6,
            },
            CodecError::BlockTooShort {
                declared: 2,
                required: 9,
            },
        ];
        for err in errors {
            assert!(err.to_string().starts_with("malformed message"));
        }
    }

    #[test]
    fn network_error_wraps_codec_error() {
        let err: NetworkError = CodecError::UnknownTemplate(12).into();
        assert!(format!("{err}").contains("unknown template 12"));
    }
}
