//! Settings of a weave pass.

/// Options applied to one [`crate::weaver::Weaver`].
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `field_interception` | `true` |
/// | `event_interception` | `true` |
/// | `strict_validation` | `false` |
/// | `helper_namespace` | `""` |
/// | `helper_name` | `"<Weave>Helpers"` |
/// | `shadow_suffix` | `"$Woven"` |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeaveConfig {
    /// Redirect reads and writes of marked fields through access helpers.
    pub field_interception: bool,

    /// Rewrite event accessors and event raise sites.
    pub event_interception: bool,

    /// Abort the pass on the first structural rule violation.
    ///
    /// When disabled the offending type is reported and left untouched.
    pub strict_validation: bool,

    /// Namespace of the generated helper type.
    pub helper_namespace: String,

    /// Name of the generated helper type holding access helpers, trampoline caches and
    /// member identities.
    pub helper_name: String,

    /// Appended to the name of a member to name the method holding its original body.
    pub shadow_suffix: String,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        WeaveConfig {
            field_interception: true,
            event_interception: true,
            strict_validation: false,
            helper_namespace: String::new(),
            helper_name: "<Weave>Helpers".to_string(),
            shadow_suffix: "$Woven".to_string(),
        }
    }
}

impl WeaveConfig {
    /// Enable or disable field interception
    #[must_use]
    pub fn with_field_interception(mut self, enabled: bool) -> Self {
        self.field_interception = enabled;
        self
    }

    /// Enable or disable event interception
    #[must_use]
    pub fn with_event_interception(mut self, enabled: bool) -> Self {
        self.event_interception = enabled;
        self
    }

    /// Fail the pass on structural rule violations
    #[must_use]
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    /// Place the helper type at `namespace.name`
    #[must_use]
    pub fn with_helper_type(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.helper_namespace = namespace.into();
        self.helper_name = name.into();
        self
    }

    /// Set the suffix of shadow members
    #[must_use]
    pub fn with_shadow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.shadow_suffix = suffix.into();
        self
    }

    /// Every member kind, strict rule checking
    #[must_use]
    pub fn full() -> Self {
        WeaveConfig::default().with_strict_validation(true)
    }

    /// Methods, constructors and property accessors only
    #[must_use]
    pub fn methods_only() -> Self {
        WeaveConfig::default()
            .with_field_interception(false)
            .with_event_interception(false)
    }

    /// Fully-qualified name of the helper type
    #[must_use]
    pub fn helper_fullname(&self) -> String {
        if self.helper_namespace.is_empty() {
            self.helper_name.clone()
        } else {
            format!("{}.{}", self.helper_namespace, self.helper_name)
        }
    }

    /// Name of the shadow of a member called `name`
    #[must_use]
    pub fn shadow_name(&self, name: &str) -> String {
        format!("{name}{}", self.shadow_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let config = WeaveConfig::methods_only();
        assert!(!config.field_interception);
        assert!(!config.event_interception);
        assert!(WeaveConfig::full().strict_validation);
    }

    #[test]
    fn names() {
        let config = WeaveConfig::default();
        assert_eq!(config.helper_fullname(), "<Weave>Helpers");
        assert_eq!(config.shadow_name("Add"), "Add$Woven");

        let config = config.with_helper_type("Demo", "Helpers").with_shadow_suffix("_orig");
        assert_eq!(config.helper_fullname(), "Demo.Helpers");
        assert_eq!(config.shadow_name(".ctor"), ".ctor_orig");
    }
}
