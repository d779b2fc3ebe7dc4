use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Persistence scope of a cached badge (one per signed-in session).
branded_id!(ScopeId, "scope");
// A UI component whose lifecycle drives listener registration.
branded_id!(OwnerId, "owner");
branded_id!(BroadcasterId, "bcast");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_id_has_prefix() {
        let id = ScopeId::new();
        assert!(id.as_str().starts_with("scope_"), "got: {id}");
    }

    #[test]
    fn owner_and_broadcaster_prefixes() {
        assert!(OwnerId::new().as_str().starts_with("owner_"));
        assert!(BroadcasterId::new().as_str().starts_with("bcast_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(OwnerId::new(), OwnerId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ScopeId::from_raw("user-42");
        assert_eq!(id.as_str(), "user-42");
        let parsed: ScopeId = "user-42".parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let owner = OwnerId::new();
        let parsed: OwnerId = owner.to_string().parse().unwrap();
        assert_eq!(owner, parsed);

        let bcast = BroadcasterId::new();
        let parsed: BroadcasterId = bcast.to_string().parse().unwrap();
        assert_eq!(bcast, parsed);
    }

    #[test]
    fn broadcaster_ids_sort_by_creation() {
        let ids: Vec<BroadcasterId> = (0..50).map(|_| BroadcasterId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "out of order: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ScopeId::from_raw("default");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"default\"");
    }
}
