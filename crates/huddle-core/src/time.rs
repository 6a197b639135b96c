use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Message timestamps use this.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Seconds since the Unix epoch. Token `exp`/`iat` claims use this.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
