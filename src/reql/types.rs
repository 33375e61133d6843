//! Protocol enums: query kinds, response kinds, runtime error kinds and
//! response notes, with their wire codes.

use serde::{Deserialize, Serialize};

/// Kind of request frame sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    Start,
    Continue,
    Stop,
    NoreplyWait,
    ServerInfo,
}

impl QueryType {
    pub fn as_u64(&self) -> u64 {
        match self {
            QueryType::Start => 1,
            QueryType::Continue => 2,
            QueryType::Stop => 3,
            QueryType::NoreplyWait => 4,
            QueryType::ServerInfo => 5,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => QueryType::Start,
            2 => QueryType::Continue,
            3 => QueryType::Stop,
            4 => QueryType::NoreplyWait,
            5 => QueryType::ServerInfo,
            _ => return None,
        })
    }
}

/// The `t` field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseType {
    pub fn as_u64(&self) -> u64 {
        match self {
            ResponseType::SuccessAtom => 1,
            ResponseType::SuccessSequence => 2,
            ResponseType::SuccessPartial => 3,
            ResponseType::WaitComplete => 4,
            ResponseType::ServerInfo => 5,
            ResponseType::ClientError => 16,
            ResponseType::CompileError => 17,
            ResponseType::RuntimeError => 18,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => ResponseType::SuccessAtom,
            2 => ResponseType::SuccessSequence,
            3 => ResponseType::SuccessPartial,
            4 => ResponseType::WaitComplete,
            5 => ResponseType::ServerInfo,
            16 => ResponseType::ClientError,
            17 => ResponseType::CompileError,
            18 => ResponseType::RuntimeError,
            _ => return None,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

/// Extra information attached to a response in its `n` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseNote {
    SequenceFeed,
    AtomFeed,
    OrderByLimitFeed,
    UnionedFeed,
    IncludesStates,
}

impl ResponseNote {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => ResponseNote::SequenceFeed,
            2 => ResponseNote::AtomFeed,
            3 => ResponseNote::OrderByLimitFeed,
            4 => ResponseNote::UnionedFeed,
            5 => ResponseNote::IncludesStates,
            _ => return None,
        })
    }

    /// Notes that mark the response as the start of a changefeed.
    pub fn is_feed(&self) -> bool {
        !matches!(self, ResponseNote::IncludesStates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes() {
        for code in [1, 2, 3, 4, 5, 16, 17, 18] {
            let kind = ResponseType::from_code(code).unwrap();
            assert_eq!(kind.as_u64(), code);
        }
        assert!(ResponseType::from_code(6).is_none());
        assert!(ResponseType::RuntimeError.is_error());
        assert!(!ResponseType::SuccessPartial.is_error());
    }

    #[test]
    fn test_query_codes() {
        assert_eq!(QueryType::Start.as_u64(), 1);
        assert_eq!(QueryType::from_code(4), Some(QueryType::NoreplyWait));
        assert!(QueryType::from_code(0).is_none());
    }

    #[test]
    fn test_notes() {
        assert!(ResponseNote::from_code(1).unwrap().is_feed());
        assert!(!ResponseNote::from_code(5).unwrap().is_feed());
        assert!(ResponseNote::from_code(9).is_none());
    }
}
