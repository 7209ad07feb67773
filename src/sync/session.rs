use std::collections::HashSet;

/// Size of the next batch after a batch of `rejected` items failed as a whole
pub fn next_batch_size(rejected: usize) -> usize {
    ((rejected + 4) / 5).max(1)
}

/// State of one folder sync attempt; dropped when the attempt ends
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub folder_id: String,
    /// Synckey the next request is sent with
    pub sync_key: String,
    pub estimate: Option<u32>,
    /// Change log ids of the batch currently on the wire
    pub in_flight: Vec<String>,
    /// Items the server rejected; not retried in this attempt
    pub failed: HashSet<String>,
    pub batch_size: usize,
    max_batch: usize,
    pub stats: FolderStats,
}

/// Counters reported when a folder finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FolderStats {
    pub added: u32,
    pub changed: u32,
    pub deleted: u32,
    pub uploaded: u32,
    pub failed: u32,
}

impl SyncSession {
    pub fn new(folder_id: &str, sync_key: &str, max_batch: usize) -> Self {
        let max_batch = max_batch.max(1);
        Self {
            folder_id: folder_id.to_string(),
            sync_key: sync_key.to_string(),
            estimate: None,
            in_flight: Vec::new(),
            failed: HashSet::new(),
            batch_size: max_batch,
            max_batch,
            stats: FolderStats::default(),
        }
    }

    /// A multi-item batch was rejected without naming the culprit
    pub fn shrink(&mut self, rejected: usize) {
        self.batch_size = next_batch_size(rejected).min(self.max_batch);
    }

    /// A single item was rejected; the next batch is full size again
    pub fn quarantine(&mut self, item_id: &str) {
        self.failed.insert(item_id.to_string());
        self.stats.failed += 1;
        self.batch_size = self.max_batch;
    }

    pub fn is_failed(&self, item_id: &str) -> bool {
        self.failed.contains(item_id)
    }
}
