use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compat::ContainerCompat;
use crate::error::{Result, ScopeError};

// =============================================================================
// File config (figment-deserialized from defaults / window-scope.toml / env vars)
// =============================================================================
//
//   window-scope.toml:   [conversation]
//                        access_bean_event_enabled = true
//
//   env var:             WINDOW_SCOPE_CONVERSATION__ACCESS_BEAN_EVENT_ENABLED=true
//
// Double underscore nests into a section, single underscores stay in field names.

pub const CONFIG_FILE_NAME: &str = "window-scope.toml";
pub const ENV_PREFIX: &str = "WINDOW_SCOPE_";

/// Top-level configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeFileConfig {
    #[serde(default)]
    pub container: ContainerCompat,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub window: WindowFileConfig,
}

impl ScopeFileConfig {
    pub fn load(config_dir: &Path) -> Result<Self> {
        load_config(config_dir).extract().map_err(ScopeError::config)
    }
}

/// Which optional lifecycle notifications bean entries emit.
///
/// Loaded once per conversation context and copied into every entry that
/// context creates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub scope_bean_event_enabled: bool,
    #[serde(default)]
    pub access_bean_event_enabled: bool,
    #[serde(default)]
    pub unscope_bean_event_enabled: bool,
}

impl ConversationConfig {
    pub fn all_events() -> Self {
        Self {
            scope_bean_event_enabled: true,
            access_bean_event_enabled: true,
            unscope_bean_event_enabled: true,
        }
    }

    pub fn event_flags(&self) -> EventFlags {
        EventFlags {
            scope: self.scope_bean_event_enabled,
            access: self.access_bean_event_enabled,
            unscope: self.unscope_bean_event_enabled,
        }
    }
}

/// The notification switches a bean entry carries for its whole life.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventFlags {
    pub scope: bool,
    pub access: bool,
    pub unscope: bool,
}

/// Window tunables (lives under `[window]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowFileConfig {
    /// Idle seconds before a window expires. 0 disables expiry.
    #[serde(default = "default_window_context_timeout_secs")]
    pub window_context_timeout_secs: u64,
    /// Live windows kept before the least recently used is evicted. 0 disables the cap.
    #[serde(default = "default_max_window_context_count")]
    pub max_window_context_count: usize,
}

impl Default for WindowFileConfig {
    fn default() -> Self {
        Self {
            window_context_timeout_secs: default_window_context_timeout_secs(),
            max_window_context_count: default_max_window_context_count(),
        }
    }
}

fn default_window_context_timeout_secs() -> u64 {
    3600
}

fn default_max_window_context_count() -> usize {
    64
}

/// Window settings (runtime view).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowSettings {
    pub timeout: Option<Duration>,
    pub max_windows: Option<usize>,
}

impl WindowSettings {
    pub fn from_file(fc: &WindowFileConfig) -> Self {
        Self {
            timeout: match fc.window_context_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_windows: match fc.max_window_context_count {
                0 => None,
                n => Some(n),
            },
        }
    }
}

/// Build a figment that layers: defaults → window-scope.toml → WINDOW_SCOPE_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ScopeFileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Supplies the conversation settings.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ConversationConfig>;
}

impl ConfigSource for ConversationConfig {
    fn load(&self) -> Result<ConversationConfig> {
        Ok(self.clone())
    }
}

/// Reads `[conversation]` from a layered figment.
pub struct FigmentConfigSource {
    figment: figment::Figment,
}

impl FigmentConfigSource {
    pub fn new(figment: figment::Figment) -> Self {
        Self { figment }
    }

    pub fn from_dir(config_dir: &Path) -> Self {
        Self::new(load_config(config_dir))
    }
}

impl ConfigSource for FigmentConfigSource {
    fn load(&self) -> Result<ConversationConfig> {
        self.figment
            .extract_inner("conversation")
            .map_err(ScopeError::config)
    }
}
