//! Metrics definitions for the control plane.

use shared::metrics_defs::{MetricDef, MetricType};

pub const GROUP_RESOLUTIONS: MetricDef = MetricDef {
    name: "group.resolutions",
    metric_type: MetricType::Counter,
    description: "Number of nodes mapped to a group. Tagged with group.",
};

pub const STICKY_RESTORES: MetricDef = MetricDef {
    name: "stickiness.restores",
    metric_type: MetricType::Counter,
    description: "Number of resolutions that used the cached cluster label of the connection",
};

pub const STICKY_EVICTIONS: MetricDef = MetricDef {
    name: "stickiness.evictions",
    metric_type: MetricType::Counter,
    description: "Number of cached cluster labels removed because their call was cancelled",
};

pub const STICKY_ENTRIES: MetricDef = MetricDef {
    name: "stickiness.entries",
    metric_type: MetricType::Gauge,
    description: "Number of connections with a cached cluster label",
};

pub const SNAPSHOT_UPDATES: MetricDef = MetricDef {
    name: "snapshot.updates",
    metric_type: MetricType::Counter,
    description: "Number of snapshots registered or replaced",
};

pub const CALLS_INFLIGHT: MetricDef = MetricDef {
    name: "calls.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of discovery calls currently being processed",
};

pub const CALL_FAILURES: MetricDef = MetricDef {
    name: "calls.failures",
    metric_type: MetricType::Counter,
    description: "Number of calls that completed with a non-cancellation error. Tagged with code.",
};

pub const DISCOVERY_RESPONSES: MetricDef = MetricDef {
    name: "discovery.responses",
    metric_type: MetricType::Counter,
    description: "Number of discovery responses carrying resources. Tagged with type.",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    GROUP_RESOLUTIONS,
    STICKY_RESTORES,
    STICKY_EVICTIONS,
    STICKY_ENTRIES,
    SNAPSHOT_UPDATES,
    CALLS_INFLIGHT,
    CALL_FAILURES,
    DISCOVERY_RESPONSES,
];
