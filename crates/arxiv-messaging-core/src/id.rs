/// Short random token tying together the log lines of one logical processing
/// session (an ingested message, a digest run, a flush).
pub fn correlation_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
