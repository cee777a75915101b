use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the hosting container drives the scope.
///
/// Some containers call `resolve` and `create` for the same request, which
/// would scope a second instance next to the first one. For those, `create`
/// has to look up an existing instance before building a new entry.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerCompat {
    /// The container may call `create` although an instance already exists.
    #[default]
    PreResolving,
    /// The container only calls `create` when `resolve` came back empty.
    DirectCreate,
}

impl ContainerCompat {
    /// Whether `create` must try `resolve` first.
    pub fn resolves_first(self) -> bool {
        matches!(self, Self::PreResolving)
    }
}

impl fmt::Display for ContainerCompat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreResolving => write!(f, "pre-resolving"),
            Self::DirectCreate => write!(f, "direct-create"),
        }
    }
}

impl FromStr for ContainerCompat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pre-resolving" => Ok(Self::PreResolving),
            "direct-create" => Ok(Self::DirectCreate),
            _ => Err(format!(
                "unknown container compatibility mode: {s:?} (expected `pre-resolving` or `direct-create`)"
            )),
        }
    }
}
