use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                let id = s.into();
                assert!(!id.is_empty(), "{} cannot be empty", stringify!($name));
                Self(id)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

id_newtype!(ParentSessionId);
id_newtype!(ToolId);

/// Logical key for one delegated sub-agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub parent_session_id: ParentSessionId,
    pub tool_id: ToolId,
}

impl SessionIdentity {
    pub fn new(parent_session_id: impl Into<ParentSessionId>, tool_id: impl Into<ToolId>) -> Self {
        Self {
            parent_session_id: parent_session_id.into(),
            tool_id: tool_id.into(),
        }
    }

    /// `{parent}:{tool}`, the composite id producers put in `subagent_id`.
    pub fn subagent_id(&self) -> String {
        format!("{}:{}", self.parent_session_id, self.tool_id)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.parent_session_id, self.tool_id)
    }
}
