use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCode};

/// Maximum allowed attachment size in bytes (5 MiB).
pub const MAX_ATTACHMENT_SIZE: i64 = 5 * 1024 * 1024;

/// MIME types permitted for attachments, paired with their extensions.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".webp", "image/webp"),
    (".gif", "image/gif"),
];

/// A file attachment reference inside a chat message. The key points into
/// the external object store and must be scoped to the authoring room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "fileKey")]
    pub key: String,
    #[serde(rename = "fileName")]
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "fileSize")]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Checks that the declared file size is positive and within limits.
pub fn validate_file_size(size: i64) -> Result<(), ChatError> {
    if size <= 0 {
        return Err(ErrorCode::InvalidParams.into());
    }
    if size > MAX_ATTACHMENT_SIZE {
        return Err(ErrorCode::FileTooLarge.into());
    }
    Ok(())
}

/// Checks that the MIME type is allowed and agrees with the filename
/// extension.
pub fn validate_file_type(file_name: &str, mime_type: &str) -> Result<(), ChatError> {
    let mime = mime_type.to_ascii_lowercase();
    if !ALLOWED_TYPES.iter().any(|(_, m)| *m == mime) {
        return Err(ErrorCode::InvalidParams.into());
    }

    let ext = match file_name.rfind('.') {
        Some(idx) if idx + 1 < file_name.len() => file_name[idx..].to_ascii_lowercase(),
        _ => return Err(ErrorCode::InvalidParams.into()),
    };

    match ALLOWED_TYPES.iter().find(|(e, _)| *e == ext) {
        Some((_, expected)) if *expected == mime => Ok(()),
        _ => Err(ErrorCode::InvalidParams.into()),
    }
}

/// Checks that the object key is scoped under `<room_code>/`.
pub fn validate_key_prefix(key: &str, room_code: &str) -> Result<(), ChatError> {
    let prefix = format!("{room_code}/");
    if key.starts_with(&prefix) {
        Ok(())
    } else {
        Err(ErrorCode::AttachmentKeyInvalid.into())
    }
}
