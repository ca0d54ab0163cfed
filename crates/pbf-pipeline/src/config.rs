use pbf_core::CacheOptions;

use crate::decoder::SkipOptions;

/// Tunables recognized by the reader (§6 "Configuration" / §10.4).
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed page size for the Stream Buffer's Cache Bucket.
    pub cache_page_bytes: u64,
    /// Soft cap on resident bytes, enforced only when `cache_options` is
    /// `LimitMaxCacheSize`.
    pub cache_max_bytes: u64,
    pub cache_options: CacheOptions,
    pub skip_options: SkipOptions,
    /// Number of decoder worker threads.
    pub workers: usize,
    /// Per-worker queue depth; `0` means unbounded (§5 backpressure).
    pub max_pending_processing: usize,
    pub verbose: bool,
    /// Whether an unrecognized `HeaderBlock.required_features` entry fails
    /// the block (DESIGN.md Open Question 1).
    pub strict_required_features: bool,
    /// Pre-flight ceiling on a single blob's claimed `(header_len,
    /// datasize)`, checked by the tokenizer before it allocates anything to
    /// hold that blob. Defaults to the OSM-PBF format's own documented cap
    /// on a blob's uncompressed size.
    pub max_blob_bytes: u64,
    /// Pre-flight ceiling on any single page the Stream Buffer materializes,
    /// any cross-page copy it assembles, or any blob payload the decoder
    /// inflates.
    pub max_alloc_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_page_bytes: 20 * 1024 * 1024,
            cache_max_bytes: 200 * 1024 * 1024,
            cache_options: CacheOptions::None,
            skip_options: SkipOptions::empty(),
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_pending_processing: 0,
            verbose: false,
            strict_required_features: true,
            max_blob_bytes: 32 * 1024 * 1024,
            max_alloc_bytes: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.cache_page_bytes, 20 * 1024 * 1024);
        assert_eq!(config.cache_max_bytes, 200 * 1024 * 1024);
        assert_eq!(config.max_pending_processing, 0);
        assert!(config.strict_required_features);
        assert!(config.workers >= 1);
        assert_eq!(config.max_blob_bytes, 32 * 1024 * 1024);
        assert_eq!(config.max_alloc_bytes, 64 * 1024 * 1024);
    }
}
