//! Sink Configuration
//!
//! Knobs for the write path: how large a sort bucket may grow, how long
//! idle buckets and writers live, and how many partitions one streamer
//! will fan out to.
//!
//! All configs deserialize with defaults, so an empty `{}` is a valid
//! production configuration:
//!
//! ```ignore
//! let config: StreamerConfig = serde_json::from_str("{}")?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the clustered sorted record writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortedWriterConfig {
    /// Records a bucket holds before it starts spilling its minimum
    /// (default: 1000).
    #[serde(default = "default_cache_size_per_cluster")]
    pub cache_size_per_cluster: usize,

    /// Idle time after which a bucket drains itself (default: 10 min).
    #[serde(with = "duration_serde", default = "default_cache_max_idle")]
    pub cache_max_idle: Duration,
}

impl Default for SortedWriterConfig {
    fn default() -> Self {
        Self {
            cache_size_per_cluster: default_cache_size_per_cluster(),
            cache_max_idle: default_cache_max_idle(),
        }
    }
}

/// Configuration for the partitioned record streamer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Partitions the streamer will open before refusing new ones
    /// (default: 1000). Overflow currently rejects; eviction is a
    /// policy hook.
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Idle TTL for cached blob writers (default: 15 min).
    #[serde(with = "duration_serde", default = "default_writer_ttl")]
    pub writer_ttl: Duration,

    /// Optional byte cap per physical blob; crossing it rolls to a new
    /// `{suffix}` blob (default: none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_writer: Option<usize>,

    /// Host tag embedded in blob names. `None` resolves the machine
    /// hostname once at streamer construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Sort-bucket tuning shared by every partition.
    #[serde(default)]
    pub sorted_writer: SortedWriterConfig,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            max_partitions: default_max_partitions(),
            writer_ttl: default_writer_ttl(),
            max_bytes_per_writer: None,
            host: None,
            sorted_writer: SortedWriterConfig::default(),
        }
    }
}

fn default_cache_size_per_cluster() -> usize {
    1000
}

fn default_cache_max_idle() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_partitions() -> usize {
    1000
}

fn default_writer_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Serde helpers for Duration serialization (whole seconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
