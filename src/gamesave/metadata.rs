use crate::store::{BlobInfo, ContainerInfo};
use chrono::{DateTime, Local, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub name: String,
    pub size: u32,
}

impl From<&BlobInfo> for BlobMetadata {
    fn from(info: &BlobInfo) -> Self {
        Self {
            name: info.name.clone(),
            size: info.size,
        }
    }
}

/// What is known about one remote container, without talking to the store.
///
/// Updated wholesale from query responses; `blobs` only means something when
/// `is_on_remote` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    container_name: String,
    pub display_name: String,
    pub is_on_remote: bool,
    pub last_modified: DateTime<Utc>,
    pub needs_sync: bool,
    pub changed_since_last_sync: bool,
    pub total_size: u64,
    pub blobs: Vec<BlobMetadata>,
}

impl ContainerMetadata {
    pub fn new(container_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            display_name: display_name.into(),
            is_on_remote: false,
            last_modified: DateTime::<Utc>::MIN_UTC,
            needs_sync: false,
            changed_since_last_sync: false,
            total_size: 0,
            blobs: Vec::new(),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Back to the "never synced" state. The display name is kept.
    pub fn reset_data(&mut self) {
        self.blobs.clear();
        self.is_on_remote = false;
        self.needs_sync = false;
        self.changed_since_last_sync = false;
        self.total_size = 0;
        self.last_modified = DateTime::<Utc>::MIN_UTC;
    }

    pub fn apply_info(&mut self, info: &ContainerInfo) {
        self.is_on_remote = true;
        self.display_name = info.display_name.clone();
        self.last_modified = info.last_modified;
        self.needs_sync = info.needs_sync;
        self.changed_since_last_sync = info.changed_since_last_sync;
        self.total_size = info.total_size;
    }

    pub fn set_blobs(&mut self, blobs: Vec<BlobMetadata>) {
        self.blobs = blobs;
    }

    /// One display-log line, e.g.
    /// `Game Board 1 (80 bytes) (synced) (2024-05-01 10:00:00)`.
    pub fn summary_line(&self) -> String {
        let mut line = format!("{} ({} bytes)", self.display_name, self.total_size);
        if self.needs_sync {
            line.push_str(" (needs sync)");
        } else {
            line.push_str(" (synced)");
        }
        if self.changed_since_last_sync {
            line.push_str(" (changed on disk)");
        }
        line.push_str(&format!(" ({})", format_local_time(self.last_modified)));
        line
    }

    pub fn blob_lines(&self) -> Vec<String> {
        self.blobs
            .iter()
            .map(|blob| format!("    {} ({} bytes)", blob.name, blob.size))
            .collect()
    }
}

fn format_local_time(timestamp: DateTime<Utc>) -> String {
    if timestamp == DateTime::<Utc>::MIN_UTC {
        return "never".to_string();
    }
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
