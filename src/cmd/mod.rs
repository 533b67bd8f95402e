//! CLI command implementations.
//!
//! | Module   | Commands handled   |
//! |----------|--------------------|
//! | `run`    | `Run`, `Serve`     |
//! | `config` | `Config`           |

pub mod config;
pub mod run;

pub use config::cmd_config;
pub use run::{cmd_run, cmd_serve};

/// Process environment lookup handed to settings and the HTTP client.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
