use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Result of a bulk event delete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkDeleteOutcome {
    pub deleted: usize,
    pub failed_ids: Vec<String>,
}

/// Snapshot of everything still pending in the events collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndeliveredStats {
    pub total_users: usize,
    pub total_events: usize,
    /// user_id -> pending event count
    pub per_user_counts: HashMap<String, usize>,
    /// event type label -> pending event count
    pub per_type_counts: HashMap<String, usize>,
}
