/// Controls type registry validation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, record nodes with an unregistered type name are rejected.
    pub fail_on_unknown_type: bool,
    /// Deepest record nesting walked by validation.
    pub max_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fail_on_unknown_type: false,
            max_depth: 64,
        }
    }
}
