//! Key derivation for the denormalized tables: the global transaction
//! ordering index, GQL view partitioning, and the planner's scan buckets.

/// One transaction index slot block: `tx_index = height * stride + sub_index`.
pub const TX_INDEX_STRIDE: u64 = 1_000_000;

/// Heights spanned by one GQL view partition.
pub const GQL_PARTITION_HEIGHTS: u64 = 1_000_000;

/// Heights spanned by one GQL view bucket.
pub const GQL_BUCKET_HEIGHTS: u64 = 100_000;

/// Heights spanned by one tag-view scan bucket.
pub const TAG_BUCKET_SPAN: u64 = 100;

/// Heights spanned by one full-scan bucket.
pub const TX_BUCKET_SPAN: u64 = 1_000;

/// Global ordering key for a transaction inside a block.
pub fn tx_index(height: u64, sub_index: u64) -> u64 {
    height * TX_INDEX_STRIDE + sub_index
}

/// Height a tx_index belongs to.
pub fn tx_index_height(tx_index: u64) -> u64 {
    tx_index / TX_INDEX_STRIDE
}

/// Compound partition/bucket key shared by the height-partitioned GQL views.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GqlBucket {
    pub partition_id: u64,
    pub bucket_id: String,
    pub bucket_number: u64,
}

impl GqlBucket {
    pub fn for_height(height: u64) -> Self {
        let bucket_number = height / GQL_BUCKET_HEIGHTS;
        Self {
            partition_id: height / GQL_PARTITION_HEIGHTS,
            bucket_id: format!("bucket_{bucket_number}"),
            bucket_number,
        }
    }
}

/// Scan bucket a tx_index falls into for the given span.
pub fn scan_bucket(tx_index: u64, span: u64) -> u64 {
    tx_index / (span * TX_INDEX_STRIDE)
}

/// Approximate chain height at the start of a scan bucket.
pub fn bucket_approx_height(bucket: u64, span: u64) -> u64 {
    bucket.saturating_mul(span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_index_orders_across_blocks_and_items() {
        assert!(tx_index(10, 999_999) < tx_index(11, 0));
        assert_eq!(tx_index_height(tx_index(123_456, 42)), 123_456);
    }

    #[test]
    fn gql_bucket_partitions_by_height() {
        let bucket = GqlBucket::for_height(1_234_567);
        assert_eq!(bucket.partition_id, 1);
        assert_eq!(bucket.bucket_number, 12);
        assert_eq!(bucket.bucket_id, "bucket_12");
    }

    #[test]
    fn scan_buckets_span_expected_heights() {
        // 100 heights per tag bucket, 1000 per full-scan bucket.
        assert_eq!(scan_bucket(tx_index(99, 0), TAG_BUCKET_SPAN), 0);
        assert_eq!(scan_bucket(tx_index(100, 0), TAG_BUCKET_SPAN), 1);
        assert_eq!(scan_bucket(tx_index(999, 5), TX_BUCKET_SPAN), 0);
        assert_eq!(scan_bucket(tx_index(1_000, 0), TX_BUCKET_SPAN), 1);
        assert_eq!(bucket_approx_height(7, TX_BUCKET_SPAN), 7_000);
    }
}
