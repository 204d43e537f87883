use std::sync::Arc;

use serde::Deserialize;

pub type PartitionKey = u64;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit over the UTF-8 bytes of `token`.
pub fn fnv1a_64(token: &str) -> PartitionKey {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Last non-empty `/`-delimited segment of `path`.
pub fn last_segment(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}

/// Derives a partition key from the path remainder of a request.
pub type PartitionKeyFn =
    Arc<dyn Fn(&str) -> Option<PartitionKey> + Send + Sync>;

/// How a route turns a request path into a partition key.
#[derive(Clone)]
pub enum PartitionKeySelector {
    /// The service is range partitioned; a path without a key is rejected.
    Keyed(PartitionKeyFn),
    /// The service has a single partition and needs no key.
    Singleton,
}

impl PartitionKeySelector {
    pub fn keyed<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<PartitionKey> + Send + Sync + 'static,
    {
        Self::Keyed(Arc::new(f))
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton)
    }
}

impl std::fmt::Debug for PartitionKeySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyed(_) => f.write_str("Keyed(..)"),
            Self::Singleton => f.write_str("Singleton"),
        }
    }
}

/// Named key strategies usable from configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    #[default]
    LastSegmentFnv,
    Singleton,
}

impl KeyStrategy {
    pub fn selector(self) -> PartitionKeySelector {
        match self {
            KeyStrategy::LastSegmentFnv => PartitionKeySelector::keyed(|path| {
                last_segment(path).map(fnv1a_64)
            }),
            KeyStrategy::Singleton => PartitionKeySelector::Singleton,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_known_vectors() {
        assert_eq!(fnv1a_64(""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64("a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64("foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn fnv_is_deterministic() {
        assert_eq!(fnv1a_64("42"), fnv1a_64("42"));
        assert_ne!(fnv1a_64("42"), fnv1a_64("43"));
    }

    #[test]
    fn last_segment_skips_empty_parts() {
        assert_eq!(last_segment("/users/42"), Some("42"));
        assert_eq!(last_segment("/users/42/"), Some("42"));
        assert_eq!(last_segment("users"), Some("users"));
        assert_eq!(last_segment("/"), None);
        assert_eq!(last_segment(""), None);
    }

    #[test]
    fn strategies_build_selectors() {
        match KeyStrategy::LastSegmentFnv.selector() {
            PartitionKeySelector::Keyed(f) => {
                assert_eq!(f("/users/7"), Some(fnv1a_64("7")));
                assert_eq!(f("/"), None);
            }
            PartitionKeySelector::Singleton => panic!("expected keyed"),
        }
        assert!(KeyStrategy::Singleton.selector().is_singleton());

        let parsed: KeyStrategy = serde_json::from_str("\"last-segment-fnv\"").unwrap();
        assert_eq!(parsed, KeyStrategy::LastSegmentFnv);
    }
}
