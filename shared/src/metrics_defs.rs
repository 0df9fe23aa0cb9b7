//! Common types for metrics definitions.
//!
//! Each crate declares its metrics as `MetricDef` constants so that the
//! full set can be enumerated (for docs or validation) without emitting
//! anything.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl MetricDef {
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        MetricDef {
            name,
            metric_type: MetricType::Counter,
            description,
        }
    }

    pub const fn histogram(name: &'static str, description: &'static str) -> Self {
        MetricDef {
            name,
            metric_type: MetricType::Histogram,
            description,
        }
    }
}
