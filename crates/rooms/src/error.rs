// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known error codes for room lifecycle failures.
///
/// Feature-level attachment/detachment codes are reported by each
/// [`Contributor`](crate::contributor::Contributor) as a raw integer; this
/// enum provides the canonical constants for the built-in features plus the
/// room-level codes the manager itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    InternalError,
    MessagesAttachmentFailed,
    PresenceAttachmentFailed,
    ReactionsAttachmentFailed,
    OccupancyAttachmentFailed,
    TypingAttachmentFailed,
    MessagesDetachmentFailed,
    PresenceDetachmentFailed,
    ReactionsDetachmentFailed,
    OccupancyDetachmentFailed,
    TypingDetachmentFailed,
    RoomInFailedState,
}

impl ErrorCode {
    /// The wire-level integer code.
    pub fn code(&self) -> u32 {
        match self {
            Self::BadRequest => 40_000,
            Self::InternalError => 50_000,
            Self::MessagesAttachmentFailed => 102_001,
            Self::PresenceAttachmentFailed => 102_002,
            Self::ReactionsAttachmentFailed => 102_003,
            Self::OccupancyAttachmentFailed => 102_004,
            Self::TypingAttachmentFailed => 102_005,
            Self::MessagesDetachmentFailed => 102_050,
            Self::PresenceDetachmentFailed => 102_051,
            Self::ReactionsDetachmentFailed => 102_052,
            Self::OccupancyDetachmentFailed => 102_053,
            Self::TypingDetachmentFailed => 102_054,
            Self::RoomInFailedState => 102_101,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::RoomInFailedState => 400,
            _ => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
            Self::MessagesAttachmentFailed => "MESSAGES_ATTACHMENT_FAILED",
            Self::PresenceAttachmentFailed => "PRESENCE_ATTACHMENT_FAILED",
            Self::ReactionsAttachmentFailed => "REACTIONS_ATTACHMENT_FAILED",
            Self::OccupancyAttachmentFailed => "OCCUPANCY_ATTACHMENT_FAILED",
            Self::TypingAttachmentFailed => "TYPING_ATTACHMENT_FAILED",
            Self::MessagesDetachmentFailed => "MESSAGES_DETACHMENT_FAILED",
            Self::PresenceDetachmentFailed => "PRESENCE_DETACHMENT_FAILED",
            Self::ReactionsDetachmentFailed => "REACTIONS_DETACHMENT_FAILED",
            Self::OccupancyDetachmentFailed => "OCCUPANCY_DETACHMENT_FAILED",
            Self::TypingDetachmentFailed => "TYPING_DETACHMENT_FAILED",
            Self::RoomInFailedState => "ROOM_IN_FAILED_STATE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code.code()
    }
}

/// Structured error carried on room state changes and returned from failed
/// lifecycle operations.
///
/// When a contributor causes a room-level failure, `code` is that
/// contributor's attachment/detachment code and the underlying transport
/// error is chained as `cause`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            status_code: code.http_status(),
            cause: None,
        }
    }

    /// Build an error from a raw integer code, e.g. one reported by a
    /// contributor.
    pub fn from_code(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), status_code, cause: None }
    }

    /// Chain an underlying error as the cause.
    pub fn caused_by(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(ref cause) = self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
