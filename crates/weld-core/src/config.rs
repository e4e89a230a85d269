use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<FusionConfig> = OnceLock::new();

/// Process-wide fusion configuration.
///
/// Read once, either explicitly through [`FusionConfig::init_global`] or
/// lazily from the environment on first use of [`FusionConfig::global`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionConfig {
    /// 0 is silent, 1 and above emits every fallback warning.
    pub warning_level: u32,
    /// Reuse analysis results for structurally identical sessions.
    pub caching: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            warning_level: 0,
            caching: true,
        }
    }
}

impl FusionConfig {
    pub const WARNING_LEVEL_VAR: &'static str = "WELD_RT_WARNING_LEVEL";
    pub const CACHING_VAR: &'static str = "WELD_ENABLE_FUSION_CACHING";

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(level) = lookup(Self::WARNING_LEVEL_VAR) {
            match level.trim().parse::<u32>() {
                Ok(level) => config.warning_level = level,
                Err(_) => log::warn!(
                    "Ignoring invalid {}={level:?}, expected an integer",
                    Self::WARNING_LEVEL_VAR
                ),
            }
        }
        if let Some(caching) = lookup(Self::CACHING_VAR) {
            config.caching = !caching.is_empty() && caching != "0";
        }
        config
    }

    /// Installs `config` as the process-wide configuration.
    ///
    /// Fails with the rejected config if the global was already initialised.
    pub fn init_global(config: FusionConfig) -> Result<(), FusionConfig> {
        GLOBAL_CONFIG.set(config)
    }

    pub fn global() -> FusionConfig {
        *GLOBAL_CONFIG.get_or_init(Self::from_env)
    }

    pub fn with_warning_level(mut self, warning_level: u32) -> Self {
        self.warning_level = warning_level;
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }
}

/// Hints passed through `complete_fusion` to the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CompletionOptions {
    /// The caller asserts there are no cross-kernel hazards, so no barriers
    /// are inserted between fused stages.
    pub no_barriers: bool,
}

impl CompletionOptions {
    pub fn with_no_barriers(mut self) -> Self {
        self.no_barriers = true;
        self
    }
}
