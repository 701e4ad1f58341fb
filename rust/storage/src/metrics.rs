use opentelemetry::metrics::{Counter, Histogram};

/// Metrics for S3 operations, registered under the `chroma.storage` meter.
#[derive(Clone)]
pub(crate) struct StorageMetrics {
    pub(crate) s3_get_count: Counter<u64>,
    pub(crate) s3_put_count: Counter<u64>,
    pub(crate) s3_put_error_count: Counter<u64>,
    pub(crate) s3_delete_count: Counter<u64>,
    pub(crate) s3_list_count: Counter<u64>,
    pub(crate) s3_get_latency_ms: Histogram<u64>,
    pub(crate) s3_put_latency_ms: Histogram<u64>,
    pub(crate) s3_list_latency_ms: Histogram<u64>,
}

impl Default for StorageMetrics {
    fn default() -> Self {
        let meter = opentelemetry::global::meter("chroma.storage");
        Self {
            s3_get_count: meter
                .u64_counter("s3_get_count")
                .with_description("Number of S3 get operations")
                .build(),
            s3_put_count: meter
                .u64_counter("s3_put_count")
                .with_description("Number of S3 put operations")
                .build(),
            s3_put_error_count: meter
                .u64_counter("s3_put_error_count")
                .with_description("Number of failed S3 put operations")
                .build(),
            s3_delete_count: meter
                .u64_counter("s3_delete_count")
                .with_description("Number of S3 delete operations")
                .build(),
            s3_list_count: meter
                .u64_counter("s3_list_count")
                .with_description("Number of S3 list operations")
                .build(),
            s3_get_latency_ms: meter
                .u64_histogram("s3_get_latency_ms")
                .with_description("Latency of S3 get operations in milliseconds")
                .with_unit("ms")
                .build(),
            s3_put_latency_ms: meter
                .u64_histogram("s3_put_latency_ms")
                .with_description("Latency of S3 put operations in milliseconds")
                .with_unit("ms")
                .build(),
            s3_list_latency_ms: meter
                .u64_histogram("s3_list_latency_ms")
                .with_description("Latency of S3 list operations in milliseconds")
                .with_unit("ms")
                .build(),
        }
    }
}
