use prometheus::core::Collector;
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub s3_requests: IntCounterVec,
    pub s3_bytes_in: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();
        let s3_requests = IntCounterVec::new(
            Opts::new("ogw_s3_requests_total", "S3 requests"),
            &["op", "status"],
        )
        .expect("s3_requests");
        let s3_bytes_in = IntCounterVec::new(
            Opts::new("ogw_s3_bytes_in_total", "S3 bytes in"),
            &["op"],
        )
        .expect("s3_bytes_in");
        register_collector(&registry, &s3_requests);
        register_collector(&registry, &s3_bytes_in);
        Arc::new(Self {
            registry,
            s3_requests,
            s3_bytes_in,
        })
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

fn register_collector<C>(registry: &Registry, collector: &C)
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone())).ok();
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn registry_exposes_the_request_counters() {
        let metrics = Metrics::new();
        metrics
            .s3_requests
            .with_label_values(&["UploadPart", "200"])
            .inc();
        metrics
            .s3_bytes_in
            .with_label_values(&["UploadPart"])
            .inc_by(42);
        let names: Vec<String> = metrics
            .gather()
            .into_iter()
            .map(|family| family.name().to_string())
            .collect();
        assert!(names.contains(&"ogw_s3_requests_total".to_string()));
        assert!(names.contains(&"ogw_s3_bytes_in_total".to_string()));
    }

    #[test]
    fn counters_accumulate_per_label() {
        let metrics = Metrics::new();
        metrics
            .s3_requests
            .with_label_values(&["UploadPart", "503"])
            .inc();
        metrics
            .s3_requests
            .with_label_values(&["UploadPart", "503"])
            .inc();
        assert_eq!(
            metrics
                .s3_requests
                .with_label_values(&["UploadPart", "503"])
                .get(),
            2
        );
    }
}
