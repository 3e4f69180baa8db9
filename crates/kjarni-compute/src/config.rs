use std::time::Duration;

use wgpu::{Backends, PowerPreference};

use crate::wait::WaitOptions;

/// Log target used when none is configured.
pub const DEFAULT_LOG_TARGET: &str = "kjarni_compute";

/// Settings for `ComputeContext` creation.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub backends: Backends,
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
    pub device_label: String,
    /// Every message the context and its pools emit goes to this `log` target.
    pub log_target: String,
    /// Options used by `ComputeContext::wait` and the blocking readback.
    pub wait: WaitOptions,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backends: Backends::PRIMARY,
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            device_label: "kjarni_compute".to_string(),
            log_target: DEFAULT_LOG_TARGET.to_string(),
            wait: WaitOptions::default(),
        }
    }
}

impl ContextConfig {
    /// Default config with environment overrides applied.
    ///
    /// - `KJARNI_COMPUTE_BACKEND`: `vulkan`, `metal`, `dx12`, `gl`, `noop`, `primary` or `all`
    /// - `KJARNI_COMPUTE_WAIT_TIMEOUT_MS`: wait deadline in milliseconds
    /// - `KJARNI_COMPUTE_FALLBACK_ADAPTER`: `1` or `true` to force a software adapter
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("KJARNI_COMPUTE_BACKEND") {
            match parse_backends(&val) {
                Some(backends) => self.backends = backends,
                None => log::warn!(
                    target: self.log_target.as_str(),
                    "ignoring unknown KJARNI_COMPUTE_BACKEND value '{}'",
                    val
                ),
            }
        }
        if let Some(val) = var("KJARNI_COMPUTE_WAIT_TIMEOUT_MS") {
            if let Ok(ms) = val.trim().parse::<u64>() {
                if ms > 0 {
                    self.wait.timeout = Some(Duration::from_millis(ms));
                }
            }
        }
        if let Some(val) = var("KJARNI_COMPUTE_FALLBACK_ADAPTER") {
            self.force_fallback_adapter = matches!(val.trim(), "1" | "true" | "TRUE" | "yes");
        }
        self
    }
}

fn parse_backends(val: &str) -> Option<Backends> {
    match val.trim().to_ascii_lowercase().as_str() {
        "vulkan" | "vk" => Some(Backends::VULKAN),
        "metal" | "mtl" => Some(Backends::METAL),
        "dx12" | "d3d12" => Some(Backends::DX12),
        "gl" | "gles" | "opengl" => Some(Backends::GL),
        "primary" => Some(Backends::PRIMARY),
        "noop" => Some(Backends::NOOP),
        // The noop backend only runs when asked for by name.
        "all" => Some(Backends::all().difference(Backends::NOOP)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.backends, Backends::PRIMARY);
        assert_eq!(config.log_target, DEFAULT_LOG_TARGET);
        assert!(config.wait.timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ContextConfig::default().with_env_overrides(env(&[
            ("KJARNI_COMPUTE_BACKEND", "Vulkan"),
            ("KJARNI_COMPUTE_WAIT_TIMEOUT_MS", "250"),
            ("KJARNI_COMPUTE_FALLBACK_ADAPTER", "1"),
        ]));
        assert_eq!(config.backends, Backends::VULKAN);
        assert_eq!(config.wait.timeout, Some(Duration::from_millis(250)));
        assert!(config.force_fallback_adapter);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let config = ContextConfig::default().with_env_overrides(env(&[
            ("KJARNI_COMPUTE_BACKEND", "cuda"),
            ("KJARNI_COMPUTE_WAIT_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(config.backends, Backends::PRIMARY);
        assert!(config.wait.timeout.is_none());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(parse_backends(" GLES "), Some(Backends::GL));
        assert_eq!(parse_backends("noop"), Some(Backends::NOOP));
        let all = parse_backends("all").unwrap();
        assert!(all.contains(Backends::VULKAN | Backends::METAL));
        assert!(!all.contains(Backends::NOOP));
        assert!(!Backends::PRIMARY.contains(Backends::NOOP));
        assert_eq!(parse_backends(""), None);
    }
}
