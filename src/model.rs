//! Records returned by the gateway
//!
//! Field names follow the gateway's camelCase JSON. Numeric fields the
//! firmware occasionally omits default to zero.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of `/installer/pcu_comm_check`: device serial to signal level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommCheck(pub BTreeMap<String, i64>);

impl CommCheck {
    /// Number of devices that answered the check
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no device answered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Signal level reported for a device
    pub fn signal(&self, serial: &str) -> Option<i64> {
        self.0.get(serial).copied()
    }
}

/// Body of `/production.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Production {
    #[serde(default)]
    pub production: Vec<ProductionRecord>,
    #[serde(default)]
    pub consumption: Vec<ProductionRecord>,
}

impl Production {
    /// The record the exporter publishes (the first production entry)
    pub fn primary(&self) -> Option<&ProductionRecord> {
        self.production.first()
    }
}

/// One measurement source (inverters, eim, ...) within a production report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub active_count: i64,
    #[serde(default)]
    pub reading_time: i64,
    #[serde(default)]
    pub w_now: f64,
    #[serde(default)]
    pub wh_lifetime: f64,
}

/// Entry of `/api/v1/production/inverters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inverter {
    pub serial_number: String,
    #[serde(default)]
    pub last_report_date: i64,
    #[serde(default)]
    pub dev_type: i64,
    #[serde(default)]
    pub last_report_watts: i64,
    #[serde(default)]
    pub max_report_watts: i64,
}
