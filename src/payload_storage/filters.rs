use serde::{Deserialize, Serialize};

use crate::utils::metadata::{ComparisonOp, Metadata, MetadataValue};

/// Boolean expression over entity metadata, applied together with the
/// similarity threshold before ranks are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Match {
        key: String,
        value: MetadataValue,
    },
    Compare {
        key: String,
        op: ComparisonOp,
        value: MetadataValue,
    },
    Contains {
        key: String,
        value: MetadataValue,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(key: &str, value: impl Into<MetadataValue>) -> Self {
        Filter::Match {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn compare(key: &str, op: ComparisonOp, value: impl Into<MetadataValue>) -> Self {
        Filter::Compare {
            key: key.to_string(),
            op,
            value: value.into(),
        }
    }
}

/// Evaluates whether the metadata satisfies the filter.
///
/// A leaf whose key is missing or whose stored type does not compare with
/// the filter value is false; `Not` of such a leaf is true.
pub fn evaluate_filter(filter: &Filter, metadata: &Metadata) -> bool {
    match filter {
        Filter::Match { key, value } => metadata
            .get(key)
            .is_some_and(|stored| stored.same_value(value)),
        Filter::Compare { key, op, value } => {
            metadata.compare_field(key, *op, value).unwrap_or(false)
        }
        Filter::Contains { key, value } => metadata.list_contains(key, value),
        Filter::And(conditions) => conditions.iter().all(|c| evaluate_filter(c, metadata)),
        Filter::Or(conditions) => conditions.iter().any(|c| evaluate_filter(c, metadata)),
        Filter::Not(inner) => !evaluate_filter(inner, metadata),
    }
}
