use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
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

branded_id!(SessionId, "sess");

/// Pointer for a turn ingested from a transcript message.
pub fn turn_pointer(session_id: &SessionId, message_id: &str) -> String {
    format!("turn:{session_id}:msg:{message_id}")
}

/// Pointer for a turn imported without a message id (1-based position).
pub fn bootstrap_turn_pointer(session_id: &SessionId, position: usize) -> String {
    format!("turn:{session_id}:bootstrap:{position}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = SessionId::from_raw("agent:main:discord:1234");
        assert_eq!(id.as_str(), "agent:main:discord:1234");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from_raw("s1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");
    }

    #[test]
    fn turn_pointers() {
        let sid = SessionId::from_raw("s1");
        assert_eq!(turn_pointer(&sid, "m-7"), "turn:s1:msg:m-7");
        assert_eq!(bootstrap_turn_pointer(&sid, 3), "turn:s1:bootstrap:3");
    }
}
