use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column names of the result table, in order.
pub const RESULT_HEADER: [&str; 4] = ["domain", "is_wordpress", "metadata", "checked_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detection {
    Yes,
    No,
    Unknown,
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        })
    }
}

/// One row of the result table. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub domain: String,
    pub is_wordpress: Detection,
    /// JSON object, `{}` when there is nothing to say.
    pub metadata: String,
    pub checked_at: DateTime<Utc>,
}

impl ProcessedRecord {
    pub fn new(domain: &str, is_wordpress: Detection, metadata: &Map<String, Value>) -> Self {
        Self {
            domain: domain.to_string(),
            is_wordpress,
            metadata: Value::Object(metadata.clone()).to_string(),
            checked_at: Utc::now(),
        }
    }
}
