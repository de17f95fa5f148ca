//! Filesystem layout helpers for partition data.

use std::path::{Path, PathBuf};

/// Base directory for a partition's data. All partitions of one namespace
/// share the namespace directory.
pub fn partition_base_path(root: &Path, namespace: &str, _partition: u32) -> PathBuf {
    root.join(namespace)
}

/// File name for per-partition state: `"{namespace}-{partition}{suffix}"`.
pub fn partition_file_name(namespace: &str, partition: u32, suffix: &str) -> String {
    format!("{}-{}{}", namespace, partition, suffix)
}
