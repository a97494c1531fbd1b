//! Registration and export of the daemon's Prometheus metrics surface.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const IMPORTS_TOTAL: &str = "dicom_imports_total";
pub const INSTANCES_UPLOADED_TOTAL: &str = "dicom_instances_uploaded_total";
pub const IMPORT_DURATION_SECONDS: &str = "dicom_import_duration_seconds";
pub const UPLOAD_DURATION_SECONDS: &str = "dicom_upload_duration_seconds";
pub const PENDING_IMPORTS: &str = "dicom_pending_imports";
pub const ACTIVE_IMPORTS: &str = "dicom_active_imports";

const IMPORT_DURATION_BUCKETS: [f64; 8] = [5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];
const UPLOAD_DURATION_BUCKETS: [f64; 7] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

/// Install the Prometheus recorder, bind its scrape listener to `addr`, and
/// describe every metric the daemon emits into. Must be called once, before
/// any component records a metric.
pub fn install(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(IMPORT_DURATION_SECONDS.to_string()),
            &IMPORT_DURATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(UPLOAD_DURATION_SECONDS.to_string()),
            &UPLOAD_DURATION_BUCKETS,
        )?
        .install()?;

    describe_counter!(
        IMPORTS_TOTAL,
        "Number of study folders processed, labeled by clinic_id and outcome status"
    );
    describe_counter!(
        INSTANCES_UPLOADED_TOTAL,
        "Number of DICOM instances successfully uploaded, labeled by clinic_id"
    );
    describe_histogram!(
        IMPORT_DURATION_SECONDS,
        Unit::Seconds,
        "Wall-clock duration of processing one study folder"
    );
    describe_histogram!(
        UPLOAD_DURATION_SECONDS,
        Unit::Seconds,
        "Wall-clock duration of one instance upload, including retries"
    );
    describe_gauge!(
        PENDING_IMPORTS,
        "Number of study folders currently debouncing before promotion"
    );
    describe_gauge!(
        ACTIVE_IMPORTS,
        "Number of study folders currently being processed by a worker"
    );

    Ok(())
}
