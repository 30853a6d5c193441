//! Plan selection from size, content type, protocol and history.

use fileferry_core::{
    LearningSnapshot, MIB, Protocol, SizeBucket, SourceMetadata, Strategy, TransferClass,
    TransferPlan, is_text_like,
};

/// Chunk size for medium objects.
pub const MEDIUM_CHUNK_BYTES: u64 = 10 * MIB;
/// Concurrent chunk workers for medium objects.
pub const MEDIUM_PARALLELISM: usize = 4;
/// Chunk size for large objects.
pub const LARGE_CHUNK_BYTES: u64 = 50 * MIB;
/// Concurrent chunk workers for large objects.
pub const LARGE_PARALLELISM: usize = 8;

/// Pure plan selection; the same inputs always produce the same plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategySelector;

impl StrategySelector {
    /// Compute the plan for moving `metadata` over `protocol`.
    ///
    /// Predictions come straight from the aggregate for the matching class
    /// and stay `None` when that class has no history.
    #[must_use]
    pub fn select(
        metadata: &SourceMetadata,
        protocol: Protocol,
        snapshot: &LearningSnapshot,
    ) -> TransferPlan {
        let class = TransferClass::for_size(protocol, metadata.size_bytes);
        let (strategy, chunk_size_bytes, parallelism) = match class.size_bucket {
            SizeBucket::Small => (Strategy::Single, None, 1),
            SizeBucket::Medium => (
                Strategy::Chunked,
                Some(MEDIUM_CHUNK_BYTES),
                MEDIUM_PARALLELISM,
            ),
            SizeBucket::Large => (Strategy::Chunked, Some(LARGE_CHUNK_BYTES), LARGE_PARALLELISM),
        };
        let compression = strategy == Strategy::Chunked
            && metadata.size_bytes > 0
            && is_text_like(&metadata.content_type);

        let history = snapshot.get(class);
        TransferPlan {
            strategy,
            chunk_size_bytes,
            parallelism,
            compression,
            predicted_success_probability: history.and_then(|aggregate| aggregate.success_rate()),
            predicted_duration: history.and_then(|aggregate| aggregate.average_duration),
            estimated_compression_ratio: history
                .filter(|_| compression)
                .and_then(|aggregate| aggregate.average_compression_ratio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fileferry_core::LearningAggregate;
    use std::time::Duration;

    fn metadata(size_bytes: u64, content_type: &str) -> SourceMetadata {
        SourceMetadata {
            size_bytes,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
            integrity_tag: None,
        }
    }

    #[test]
    fn small_csv_streams_without_compression() {
        let plan = StrategySelector::select(
            &metadata(5 * MIB, "text/csv"),
            Protocol::Sftp,
            &LearningSnapshot::empty(),
        );
        assert_eq!(plan.strategy, Strategy::Single);
        assert_eq!(plan.parallelism, 1);
        assert_eq!(plan.chunk_size_bytes, None);
        assert!(!plan.compression);
    }

    #[test]
    fn medium_csv_cold_start_is_chunked_and_compressed_without_predictions() {
        let plan = StrategySelector::select(
            &metadata(150 * MIB, "text/csv"),
            Protocol::Sftp,
            &LearningSnapshot::empty(),
        );
        assert_eq!(plan.strategy, Strategy::Chunked);
        assert_eq!(plan.chunk_size_bytes, Some(10 * MIB));
        assert_eq!(plan.parallelism, 4);
        assert!(plan.compression);
        assert_eq!(plan.predicted_success_probability, None);
        assert_eq!(plan.predicted_duration, None);
        assert_eq!(plan.chunk_count(150 * MIB), 15);
    }

    #[test]
    fn large_binary_uses_wide_chunks_without_compression() {
        let plan = StrategySelector::select(
            &metadata(2 * 1024 * MIB, "application/octet-stream"),
            Protocol::Ftp,
            &LearningSnapshot::empty(),
        );
        assert_eq!(plan.chunk_size_bytes, Some(50 * MIB));
        assert_eq!(plan.parallelism, 8);
        assert!(!plan.compression);
    }

    #[test]
    fn bucket_boundaries() {
        let empty = LearningSnapshot::empty();
        let csv = |size| {
            StrategySelector::select(&metadata(size, "text/csv"), Protocol::Sftp, &empty)
        };
        assert_eq!(csv(10 * MIB - 1).strategy, Strategy::Single);
        assert_eq!(csv(10 * MIB).parallelism, 4);
        assert_eq!(csv(1024 * MIB).parallelism, 8);
    }

    #[test]
    fn zero_bytes_and_unknown_types_never_compress() {
        let empty = LearningSnapshot::empty();
        let zero = StrategySelector::select(&metadata(0, "text/plain"), Protocol::Sftp, &empty);
        assert_eq!(zero.strategy, Strategy::Single);
        assert!(!zero.compression);
        let unknown = StrategySelector::select(&metadata(200 * MIB, ""), Protocol::Sftp, &empty);
        assert!(!unknown.compression);
    }

    #[test]
    fn predictions_come_from_the_matching_class_only() {
        let class = TransferClass::new(Protocol::Sftp, SizeBucket::Medium);
        let snapshot = LearningSnapshot::from_aggregates([LearningAggregate {
            class,
            attempts: 4,
            successes: 3,
            average_duration: Some(Duration::from_secs(12)),
            average_compression_ratio: Some(0.25),
            last_updated: Utc::now(),
        }]);
        let json = metadata(150 * MIB, "application/json");
        let plan = StrategySelector::select(&json, Protocol::Sftp, &snapshot);
        assert_eq!(plan.predicted_success_probability, Some(0.75));
        assert_eq!(plan.predicted_duration, Some(Duration::from_secs(12)));
        assert_eq!(plan.estimated_compression_ratio, Some(0.25));

        let csv = metadata(150 * MIB, "text/csv");
        let other = StrategySelector::select(&csv, Protocol::Ftp, &snapshot);
        assert_eq!(other.predicted_success_probability, None);
    }

    #[test]
    fn selection_is_deterministic() {
        let snapshot = LearningSnapshot::empty();
        let input = metadata(300 * MIB, "text/csv");
        assert_eq!(
            StrategySelector::select(&input, Protocol::Sftp, &snapshot),
            StrategySelector::select(&input, Protocol::Sftp, &snapshot)
        );
    }
}
