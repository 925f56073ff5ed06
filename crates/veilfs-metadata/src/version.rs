//! Schema version classification.
//!
//! The wire `version` field has historically been an integer, a
//! decimal-like token (`1.2`), or a string, and may live inside the
//! `metadata` object or at the document root. Classification happens once,
//! into a tagged enum; nothing downstream compares floats.

use serde_json::Value;

/// The three coexisting metadata wire formats, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    V1,
    V1_2,
    V2,
}

impl SchemaVersion {
    /// Classify a wire `version` token. Returns `None` for an absent or
    /// unrecognized token, which callers treat as "oldest supported, needs
    /// migration".
    pub fn classify(token: Option<&Value>) -> Option<SchemaVersion> {
        let token = token?;
        match token {
            Value::Number(n) => {
                if let Some(i) = n.as_u64() {
                    return match i {
                        1 => Some(SchemaVersion::V1),
                        2 => Some(SchemaVersion::V2),
                        _ => None,
                    };
                }
                // Legacy float-like token. Matched against the two decimal
                // versions that ever existed, no arithmetic involved.
                match n.to_string().as_str() {
                    "1.0" => Some(SchemaVersion::V1),
                    "1.1" | "1.2" => Some(SchemaVersion::V1_2),
                    "2.0" => Some(SchemaVersion::V2),
                    _ => None,
                }
            }
            Value::String(s) => match s.trim() {
                "1" | "1.0" => Some(SchemaVersion::V1),
                "1.1" | "1.2" => Some(SchemaVersion::V1_2),
                "2" | "2.0" => Some(SchemaVersion::V2),
                _ => None,
            },
            _ => None,
        }
    }

    /// The token written on encode. Only V1 and V2 are ever produced; a
    /// V1.2 document re-encodes as V2.
    pub fn wire_token(self) -> Value {
        match self {
            SchemaVersion::V1 => Value::from(1),
            SchemaVersion::V1_2 => Value::from("1.2"),
            SchemaVersion::V2 => Value::from(2),
        }
    }
}
