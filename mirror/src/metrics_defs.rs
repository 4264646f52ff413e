//! Metrics emitted by the portal db service.
//!
//! The cache itself is silent; everything here is recorded by startup and
//! the request handlers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr $(, $key:literal => $value:expr)* $(,)?) => {
        metrics::counter!($def.name $(, $key => $value)*)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr $(, $key:literal => $value:expr)* $(,)?) => {
        metrics::histogram!($def.name $(, $key => $value)*)
    };
}

pub const POPULATE_DURATION: MetricDef = MetricDef {
    name: "cache.populate.duration",
    metric_type: MetricType::Histogram,
    description: "Time to read the full dataset from the store and build the cache, in seconds",
};

pub const POPULATE_ROWS: MetricDef = MetricDef {
    name: "cache.populate.rows",
    metric_type: MetricType::Histogram,
    description: "Number of entities indexed by the cache after population",
};

pub const CACHE_MUTATIONS: MetricDef = MetricDef {
    name: "cache.mutations",
    metric_type: MetricType::Counter,
    description: "Confirmed store writes replayed into the cache, tagged by entity",
};

pub const STORE_WRITE_FAILURES: MetricDef = MetricDef {
    name: "store.write.failures",
    metric_type: MetricType::Counter,
    description: "Store writes that failed, tagged by operation",
};

pub const ALL_METRICS: &[MetricDef] = &[
    POPULATE_DURATION,
    POPULATE_ROWS,
    CACHE_MUTATIONS,
    STORE_WRITE_FAILURES,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique() {
        let names: HashSet<_> = ALL_METRICS.iter().map(|def| def.name).collect();
        assert_eq!(names.len(), ALL_METRICS.len());
        assert!(ALL_METRICS.iter().all(|def| !def.description.is_empty()));
    }
}
