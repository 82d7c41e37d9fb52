//! OpenTelemetry counters for failed lifecycle verbs
//!
//! Instruments hang off the global meter; without an installed provider
//! they are no-ops.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("ec2-actuator"));

/// Labels:
/// - `name`, `namespace`: the machine
/// - `reason`: error kind
pub static FAILED_INSTANCE_CREATE: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ec2_actuator_failed_instance_create_total")
        .with_description("Total number of failed instance creations")
        .with_unit("{errors}")
        .build()
});

/// Labels as [`FAILED_INSTANCE_CREATE`]
pub static FAILED_INSTANCE_UPDATE: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ec2_actuator_failed_instance_update_total")
        .with_description("Total number of failed instance updates")
        .with_unit("{errors}")
        .build()
});

/// Labels as [`FAILED_INSTANCE_CREATE`]
pub static FAILED_INSTANCE_DELETE: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ec2_actuator_failed_instance_delete_total")
        .with_description("Total number of failed instance deletions")
        .with_unit("{errors}")
        .build()
});

/// Lifecycle verb a failure is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn counter(&self) -> &'static Counter<u64> {
        match self {
            Operation::Create => &FAILED_INSTANCE_CREATE,
            Operation::Update => &FAILED_INSTANCE_UPDATE,
            Operation::Delete => &FAILED_INSTANCE_DELETE,
        }
    }
}

pub fn record_failure(operation: Operation, name: &str, namespace: &str, reason: &str) {
    operation.counter().add(
        1,
        &[
            KeyValue::new("name", name.to_string()),
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new("reason", reason.to_string()),
        ],
    );
}
