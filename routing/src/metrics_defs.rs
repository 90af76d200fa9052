//! Metrics definitions for automatic routing.

use shared::metrics_defs::{MetricDef, MetricType};

pub const DISCOVERY_RUNS: MetricDef = MetricDef {
    name: "routing.discovery.runs",
    metric_type: MetricType::Counter,
    description: "Remote discovery runs, tagged with the resulting status",
};

pub const DISCOVERY_DURATION: MetricDef = MetricDef {
    name: "routing.discovery.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a remote discovery in seconds",
};

pub const FILTER_ALLOWED: MetricDef = MetricDef {
    name: "routing.filter.allowed",
    metric_type: MetricType::Counter,
    description: "Proxy requests the routing filter let through to the remote",
};

pub const FILTER_REJECTED: MetricDef = MetricDef {
    name: "routing.filter.rejected",
    metric_type: MetricType::Counter,
    description: "Proxy requests the routing filter kept from the remote",
};

pub const PREFIX_FILE_PUBLISHED: MetricDef = MetricDef {
    name: "routing.prefix_file.published",
    metric_type: MetricType::Counter,
    description: "Prefix files written with a supported list",
};

pub const PREFIX_FILE_UNPUBLISHED: MetricDef = MetricDef {
    name: "routing.prefix_file.unpublished",
    metric_type: MetricType::Counter,
    description: "Prefix files replaced by the noscrape marker",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DISCOVERY_RUNS,
    DISCOVERY_DURATION,
    FILTER_ALLOWED,
    FILTER_REJECTED,
    PREFIX_FILE_PUBLISHED,
    PREFIX_FILE_UNPUBLISHED,
];
