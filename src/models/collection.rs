//! Remote vector collection identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::{DEFAULT_DIMENSION, DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE};

/// Similarity metric used by a vector collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    #[serde(alias = "dot", alias = "dot_product")]
    DotProduct,
    #[serde(alias = "euclid", alias = "l2")]
    Euclidean,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::DotProduct => write!(f, "dotproduct"),
            Metric::Euclidean => write!(f, "euclidean"),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "dotproduct" | "dot_product" | "dot" => Ok(Metric::DotProduct),
            "euclidean" | "euclid" | "l2" => Ok(Metric::Euclidean),
            _ => Err(format!("unknown similarity metric: {}", s)),
        }
    }
}

/// Identifies a remote collection: index, namespace partition, vector width and metric.
///
/// `dimension` must equal the embedding model's output width. Writes or
/// queries with a different width are rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorCollection {
    pub index_name: String,
    pub namespace: String,
    pub dimension: usize,
    pub metric: Metric,
}

impl VectorCollection {
    pub fn new(
        index_name: impl Into<String>,
        namespace: impl Into<String>,
        dimension: usize,
        metric: Metric,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            namespace: namespace.into(),
            dimension,
            metric,
        }
    }
}

impl Default for VectorCollection {
    fn default() -> Self {
        Self::new(
            DEFAULT_INDEX_NAME,
            DEFAULT_NAMESPACE,
            DEFAULT_DIMENSION,
            Metric::Cosine,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_defaults() {
        let collection = VectorCollection::default();
        assert_eq!(collection.index_name, "quickstart");
        assert_eq!(collection.namespace, "default");
        assert_eq!(collection.dimension, 768);
        assert_eq!(collection.metric, Metric::Cosine);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("DOT".parse::<Metric>().unwrap(), Metric::DotProduct);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("manhattan".parse::<Metric>().is_err());
    }

    #[test]
    fn test_metric_display_round_trips_through_serde() {
        let json = serde_json::to_string(&Metric::DotProduct).unwrap();
        assert_eq!(json, "\"dotproduct\"");
        let parsed: Metric = serde_json::from_str("\"euclid\"").unwrap();
        assert_eq!(parsed, Metric::Euclidean);
    }
}
