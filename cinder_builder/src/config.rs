//! Builder configuration aggregated from defaults and environment variables.
//!
//! A single struct resolved once per compile and owned by the
//! [`MethodBuilder`](crate::MethodBuilder). Every builder cursor reads it
//! from there; nothing is global.

use std::path::PathBuf;

// =============================================================================
// Capabilities
// =============================================================================

/// Target features the builder may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Hardware transactional memory. Without it, transactions are
    /// rewritten to always take the persistent-failure path.
    pub transactional_memory: bool,

    /// Atomic fetch-and-add. There is no fallback when it is missing.
    pub atomic_add: bool,
}

impl Capabilities {
    /// Every feature available.
    pub const fn all() -> Self {
        Capabilities {
            transactional_memory: true,
            atomic_add: true,
        }
    }
}

// =============================================================================
// Builder Configuration
// =============================================================================

/// Configuration for one method compile.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Emit `tracing` events for engine steps (append, count, connect,
    /// successor registration, worklist pushes).
    pub trace_il: bool,

    /// Emit `tracing` events for VM-state propagation and merges.
    pub trace_vm_state: bool,

    /// Run the structural verifier after connecting.
    pub verify: bool,

    /// Write the IL listing of every compiled method into this directory.
    pub dump_dir: Option<PathBuf>,

    pub capabilities: Capabilities,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            trace_il: false,
            trace_vm_state: false,
            verify: true,
            dump_dir: None,
            capabilities: Capabilities::default(),
        }
    }
}

impl BuilderConfig {
    /// Resolve configuration from the environment.
    ///
    /// - `CINDER_TRACE_IL`, `CINDER_TRACE_VM_STATE`: tracing toggles
    /// - `CINDER_VERIFY`: `0` disables verification
    /// - `CINDER_DUMP_IL`: listing directory
    /// - `CINDER_TM`, `CINDER_ATOMIC_ADD`: capability overrides
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |var: &str| lookup(var).map(|v| !v.is_empty() && v != "0");
        let defaults = Self::default();

        BuilderConfig {
            trace_il: flag("CINDER_TRACE_IL").unwrap_or(defaults.trace_il),
            trace_vm_state: flag("CINDER_TRACE_VM_STATE").unwrap_or(defaults.trace_vm_state),
            verify: flag("CINDER_VERIFY").unwrap_or(defaults.verify),
            dump_dir: lookup("CINDER_DUMP_IL")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            capabilities: Capabilities {
                transactional_memory: flag("CINDER_TM")
                    .unwrap_or(defaults.capabilities.transactional_memory),
                atomic_add: flag("CINDER_ATOMIC_ADD").unwrap_or(defaults.capabilities.atomic_add),
            },
        }
    }

    /// Verification on, tracing on, every capability available.
    pub fn for_testing() -> Self {
        BuilderConfig {
            trace_il: true,
            trace_vm_state: true,
            verify: true,
            dump_dir: None,
            capabilities: Capabilities::all(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = BuilderConfig::from_lookup(lookup(&[]));
        assert!(!config.trace_il);
        assert!(config.verify);
        assert!(config.dump_dir.is_none());
        assert_eq!(config.capabilities, Capabilities::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = BuilderConfig::from_lookup(lookup(&[
            ("CINDER_TRACE_IL", "1"),
            ("CINDER_VERIFY", "0"),
            ("CINDER_DUMP_IL", "/tmp/il"),
            ("CINDER_TM", "yes"),
        ]));
        assert!(config.trace_il);
        assert!(!config.trace_vm_state);
        assert!(!config.verify);
        assert_eq!(config.dump_dir, Some(PathBuf::from("/tmp/il")));
        assert!(config.capabilities.transactional_memory);
        assert!(!config.capabilities.atomic_add);
    }

    #[test]
    fn test_empty_value_is_false() {
        let config = BuilderConfig::from_lookup(lookup(&[("CINDER_TRACE_IL", "")]));
        assert!(!config.trace_il);
    }

    #[test]
    fn test_for_testing_enables_everything() {
        let config = BuilderConfig::for_testing();
        assert!(config.verify);
        assert_eq!(config.capabilities, Capabilities::all());
    }
}
