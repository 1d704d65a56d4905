//! # Schema helpers
//!
//! Structural schema overrides for fields kube-rs cannot express on its own.

use schemars::{json_schema, Schema, SchemaGenerator};

/// `IntOrString` fields such as `standby: 10%` or `standby: 2`
pub(crate) fn int_or_string(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "x-kubernetes-int-or-string": true,
        "nullable": true
    })
}

/// Free-form objects passed through to bootstrap scripts untouched
pub(crate) fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}
