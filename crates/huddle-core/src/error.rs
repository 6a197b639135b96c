/// Application error codes, grouped by class: 1xxx request-shape, 2xxx
/// room/content business rules, 3xxx authn/session, 5xxx internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidParams = 1001,
    RateLimitExceeded = 1007,

    RoomTypeInvalid = 2101,
    RoomCodeExists = 2102,
    RoomNotFound = 2103,
    RoomFull = 2104,
    ContentTooLong = 2201,
    FileTooLarge = 2202,
    AttachmentCountInvalid = 2203,
    AttachmentKeyInvalid = 2204,

    SessionKicked = 3004,
    Unauthorized = 3005,
    AlreadyLoggedIn = 3006,
    InvalidCredentials = 3010,

    Internal = 5000,
}

impl ErrorCode {
    /// The numeric wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// User-facing message for this code.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidParams => "Invalid or missing parameters.",
            Self::RateLimitExceeded => "Request rate limit exceeded. Please try again later.",
            Self::RoomTypeInvalid => "Chat type is invalid, must be 'private' or 'group'.",
            Self::RoomCodeExists => "The generated chat code already exists.",
            Self::RoomNotFound => "The requested chat does not exist.",
            Self::RoomFull => "The chat has reached its maximum client capacity.",
            Self::ContentTooLong => "The message content exceeds the maximum allowed length.",
            Self::FileTooLarge => "The file size exceeds the maximum allowed limit.",
            Self::AttachmentCountInvalid => {
                "The number of attachments is outside the allowed range."
            },
            Self::AttachmentKeyInvalid => {
                "Attachment file key is invalid or does not belong to this room."
            },
            Self::SessionKicked => "Session replaced by new connection. Please check other tabs.",
            Self::Unauthorized => "Authentication failed. Missing or invalid token.",
            Self::AlreadyLoggedIn => "Already logged in.",
            Self::InvalidCredentials => "Invalid username or password.",
            Self::Internal => "An unexpected server error occurred.",
        }
    }

    /// HTTP status for errors surfaced before the WebSocket upgrade.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidParams | Self::RoomTypeInvalid => 400,
            Self::Unauthorized | Self::InvalidCredentials => 401,
            Self::RoomFull | Self::AttachmentKeyInvalid | Self::SessionKicked => 403,
            Self::RoomNotFound => 404,
            Self::RoomCodeExists | Self::AlreadyLoggedIn => 409,
            Self::ContentTooLong | Self::FileTooLarge => 413,
            Self::AttachmentCountInvalid => 400,
            Self::RateLimitExceeded => 429,
            Self::Internal => 500,
        }
    }
}

/// A business error carrying its wire code and user-facing message.
/// Over WebSocket only `{code, message}` travel in an ERROR envelope; over
/// HTTP the same pair is rendered with [`ErrorCode::http_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub code: ErrorCode,
    pub message: String,
}

impl ChatError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }

    /// Override the catalog message, keeping the code.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "error {} (http {}): {}",
            self.code.code(),
            self.code.http_status(),
            self.message
        )
    }
}

impl std::error::Error for ChatError {}

impl From<ErrorCode> for ChatError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}
