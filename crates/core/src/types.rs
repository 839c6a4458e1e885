/// Records are keyed by opaque string identifiers.
pub type RecordId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh record identifier.
///
/// UUID v7 text sorts by creation time, so id order and insertion order agree.
pub fn new_record_id() -> RecordId {
    uuid::Uuid::now_v7().to_string()
}
