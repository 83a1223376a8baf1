use std::fmt;

use quillpad_core::token::TokenError;

/// Protocol-visible relay failures. Each maps to the exact `error` frame
/// message clients are written against; internal detail never leaks onto
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Missing, invalid, or expired session token.
    Unauthorized,
    /// Document absent, malformed id, or an internal lookup failure.
    DocumentNotFound,
    /// Document exists but grants the caller nothing.
    AccessDenied,
    /// A viewer attempted a content write.
    ReadOnly,
    /// A non-join frame arrived before a successful join.
    NotJoined,
}

impl RelayError {
    /// Message sent in the `error` frame.
    pub fn frame_message(&self) -> &'static str {
        match self {
            RelayError::Unauthorized => "Unauthorized",
            RelayError::DocumentNotFound => "Document not found",
            RelayError::AccessDenied => "Access denied",
            RelayError::ReadOnly => "Read-only access",
            RelayError::NotJoined => "Not joined",
        }
    }

    /// Whether the connection is closed after reporting this error.
    /// Join denials are fatal; in-session violations keep the stream open.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            RelayError::Unauthorized | RelayError::DocumentNotFound | RelayError::AccessDenied
        )
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.frame_message())
    }
}

impl From<TokenError> for RelayError {
    fn from(_: TokenError) -> Self {
        RelayError::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_denials_close_the_connection() {
        assert!(RelayError::Unauthorized.closes_connection());
        assert!(RelayError::DocumentNotFound.closes_connection());
        assert!(RelayError::AccessDenied.closes_connection());
    }

    #[test]
    fn session_violations_keep_the_connection_open() {
        assert!(!RelayError::ReadOnly.closes_connection());
        assert!(!RelayError::NotJoined.closes_connection());
    }

    #[test]
    fn frame_messages_match_the_wire_contract() {
        assert_eq!(RelayError::Unauthorized.frame_message(), "Unauthorized");
        assert_eq!(
            RelayError::DocumentNotFound.frame_message(),
            "Document not found"
        );
        assert_eq!(RelayError::AccessDenied.frame_message(), "Access denied");
        assert_eq!(RelayError::ReadOnly.frame_message(), "Read-only access");
        assert_eq!(RelayError::NotJoined.frame_message(), "Not joined");
    }
}
