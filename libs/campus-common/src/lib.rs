pub mod types;

/// RFC 3339 timestamp with millisecond precision, used by the API and CLI
/// when stamping responses.
pub fn timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
