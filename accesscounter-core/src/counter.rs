use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent visit counter record.
///
/// Stored as `{"visit": N, "last_access": "<rfc3339>"}`. Both fields are
/// optional on decode and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "visit", default, skip_serializing_if = "is_zero")]
    pub visit_count: u64,
    #[serde(rename = "last_access", default, skip_serializing_if = "Option::is_none")]
    pub last_access_time: Option<DateTime<Utc>>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Counter {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Next state after one visit at `now`.
    pub fn incremented(&self, now: DateTime<Utc>) -> Self {
        Self {
            visit_count: self.visit_count.saturating_add(1),
            last_access_time: Some(now),
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut payload = serde_json::to_vec(self)?;
        payload.push(b'\n');
        Ok(payload)
    }

    pub fn from_json_bytes(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Result of looking up the counter key. Absence is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterLookup {
    Found(Counter),
    NotFound,
}

impl CounterLookup {
    pub fn into_counter_or_zero(self) -> Counter {
        match self {
            CounterLookup::Found(counter) => counter,
            CounterLookup::NotFound => Counter::zero(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, CounterLookup::Found(_))
    }
}
