//! Declarative configuration for the two inputs that don't fit the
//! constructor-callback model: the pre-flight identity and the bind
//! address list (SPEC_FULL.md §1a). Code-driven `Server` construction
//! (spec.md §4.4) is unaffected; this module just lets a host binary load
//! these two small, genuinely-data-shaped inputs from TOML/env/etc instead
//! of wiring up its own (de)serialization, the way `links`' `config` module
//! does for its own settings.

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

/// The three values pre-flight privilege drop consumes (spec.md §4.6).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub struct PreflightConfig {
    /// User name to `setuid` to after the chroot.
    pub user: String,
    /// Group name to `setgid` to after the chroot.
    pub group: String,
    /// Directory to `chdir`/`chroot` into. `None` skips the chroot step
    /// entirely but still drops to `user`/`group` when running as root.
    pub chroot_dir: Option<PathBuf>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        PreflightConfig { user: "nobody".to_string(), group: "nogroup".to_string(), chroot_dir: None }
    }
}

/// The multiplexer's bind-address input (spec.md §4.5): an ordered list,
/// empty meaning "all local IPv4 interface addresses".
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub struct BindConfig {
    /// Bind addresses (IPv4 literals) or, for `Family::Local` servers,
    /// filesystem paths.
    pub addresses: Vec<String>,
}
