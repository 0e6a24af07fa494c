use serde::{Deserialize, Serialize};

/// The sidecar's own `{workload_name, namespace}` pair, extracted once at
/// plugin init from host properties. Read-only for the lifetime of the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvoyIdentity {
    pub workload_name: String,
    pub namespace: String,
    pub pod_name: Option<String>,
    /// False when host-property extraction failed at init.
    pub is_valid: bool,
}

impl EnvoyIdentity {
    pub fn new(workload_name: impl Into<String>, namespace: impl Into<String>, pod_name: Option<String>) -> Self {
        Self { workload_name: workload_name.into(), namespace: namespace.into(), pod_name, is_valid: true }
    }

    /// Constructed when host-property extraction fails at plugin init.
    /// An invalid identity still fails open: only wildcard-selector
    /// policies apply.
    pub fn invalid() -> Self {
        Self { workload_name: String::new(), namespace: String::new(), pod_name: None, is_valid: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identity_has_empty_fields() {
        let id = EnvoyIdentity::invalid();
        assert!(!id.is_valid);
        assert!(id.workload_name.is_empty());
    }
}
