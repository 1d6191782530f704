//! Configuration types and loading for the mibex debug engine
//!
//! Configuration is an infrastructure concern and lives outside the domain
//! layer. Everything a session needs — timeouts, channel capacities, the
//! backend launch command, and the per-backend-variant capability table —
//! is carried by an explicit [`Config`] value passed into session
//! construction. There are no process-wide mutable singletons.
//!
//! # Module organization
//!
//! - `backend` - backend launch settings and [`BackendCapabilities`]
//! - `session` - timeouts and queue capacities
//! - `constants` - default values, single source of truth
//! - `loader` - TOML file loading

mod loader;

pub mod constants;

mod backend;
mod session;

pub use backend::{BackendCapabilities, BackendConfig};
pub use loader::{load_config, ConfigError};
pub use session::SessionConfig;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}
