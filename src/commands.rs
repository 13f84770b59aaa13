use serde::Serialize;
use std::fmt;

pub mod download;
pub mod player;
pub mod playlist;

/// Short message for the user, the headless stand-in for a toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum Notice {
    Info(String),
    Error(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Info(message) => f.write_str(message),
            Notice::Error(message) => write!(f, "error: {}", message),
        }
    }
}
