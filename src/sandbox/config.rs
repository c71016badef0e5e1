use std::{env, path::PathBuf, str::FromStr};

use tracing::warn;

use crate::transform::Strategy;

/// Environment variable naming a directory rewritten classes are written to.
pub const DUMP_DIR_ENV: &str = "SHADOWBOX_DUMP_DIR";

/// Environment variable selecting the call-site strategy (`fixed-call-site` or
/// `dynamically-linked`).
pub const STRATEGY_ENV: &str = "SHADOWBOX_STRATEGY";

/// Construction-time settings of a [`crate::sandbox::Sandbox`].
///
/// # Examples
///
/// ```rust
/// use shadowbox::{sandbox::SandboxConfig, transform::Strategy};
///
/// let config = SandboxConfig::linked().with_namespace("widget-tests");
/// assert_eq!(config.strategy, Strategy::DynamicallyLinked);
/// assert!(config.dump_dir.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxConfig {
    /// How rewritten code finds its call sites
    pub strategy: Strategy,
    /// Directory every rewritten class is also written to, as `pkg/a/Widget.class`.
    /// Never read back.
    pub dump_dir: Option<PathBuf>,
    /// Name of the sandbox's namespace; generated when `None`
    pub namespace: Option<String>,
}

impl SandboxConfig {
    /// Fixed call sites: generated code carries full signatures and works on any host.
    #[must_use]
    pub fn portable() -> SandboxConfig {
        SandboxConfig {
            strategy: Strategy::FixedCallSite,
            ..SandboxConfig::default()
        }
    }

    /// Dynamically linked call sites with memoized resolutions.
    #[must_use]
    pub fn linked() -> SandboxConfig {
        SandboxConfig {
            strategy: Strategy::DynamicallyLinked,
            ..SandboxConfig::default()
        }
    }

    /// The portable preset, overridden by [`DUMP_DIR_ENV`] and [`STRATEGY_ENV`].
    ///
    /// An unparsable strategy is ignored with a warning.
    #[must_use]
    pub fn from_env() -> SandboxConfig {
        let mut config = SandboxConfig::portable();
        if let Some(dir) = env::var_os(DUMP_DIR_ENV).filter(|dir| !dir.is_empty()) {
            config.dump_dir = Some(PathBuf::from(dir));
        }
        if let Ok(value) = env::var(STRATEGY_ENV) {
            match Strategy::from_str(value.trim()) {
                Ok(strategy) => config.strategy = strategy,
                Err(_) => warn!(
                    value = %value,
                    "unknown {STRATEGY_ENV}, keeping {}",
                    config.strategy
                ),
            }
        }
        config
    }

    /// Sets the call-site strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the dump directory.
    #[must_use]
    pub fn with_dump_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Names the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
}
