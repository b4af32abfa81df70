//! Declarative markers attached to the assembly, types, members and parameters.
//!
//! A marker names an interceptor class and carries named arguments that refine how the
//! interceptor is applied. The selection engine reads the well-known argument names
//! defined here; interceptors may read any other argument through [`Marker::get`].

use std::fmt;

use strum::{Display, EnumIter};

/// Named argument restricting the member kinds a marker applies to (an int of target flags)
pub const ARG_TARGETS: &str = "targets";
/// Named argument restricting the visibility a marker applies to (an int of modifier flags)
pub const ARG_MODIFIERS: &str = "modifiers";
/// Named argument filtering on the fully-qualified declaring type name
pub const ARG_TYPE_PATTERN: &str = "type_pattern";
/// Named argument filtering on the member name
pub const ARG_MEMBER_PATTERN: &str = "member_pattern";
/// Named argument that, when true, suppresses the interceptor class
pub const ARG_EXCLUDE: &str = "exclude";

/// Where a marker is declared. The ordering of the variants is the order in which
/// interceptors of different classes run on one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum MarkerScope {
    /// Declared on the module
    Assembly,
    /// Declared on the declaring type
    Type,
    /// Declared on the member, or on the property or event owning an accessor
    Member,
    /// Declared on one of the member's parameters
    Parameter,
}

/// Value of a named marker argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerValue {
    /// Boolean flag
    Bool(bool),
    /// Integer, also used for flag masks
    Int(i64),
    /// String
    Str(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Bool(value) => write!(f, "{value}"),
            MarkerValue::Int(value) => write!(f, "{value}"),
            MarkerValue::Str(value) => write!(f, "\"{value}\""),
        }
    }
}

/// A declarative marker naming an interceptor class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
    /// Name of the interceptor class, matched against the registry
    pub class: String,
    /// Named arguments in declaration order
    pub args: Vec<(String, MarkerValue)>,
}

impl Marker {
    /// Marker without arguments
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Marker {
            class: class.into(),
            args: Vec::new(),
        }
    }

    /// Add a named argument
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: MarkerValue) -> Self {
        self.args.push((name.into(), value));
        self
    }

    /// Add a string argument
    #[must_use]
    pub fn with_str(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, MarkerValue::Str(value.into()))
    }

    /// Add an integer argument
    #[must_use]
    pub fn with_int(self, name: impl Into<String>, value: i64) -> Self {
        self.with(name, MarkerValue::Int(value))
    }

    /// Add a boolean argument
    #[must_use]
    pub fn with_bool(self, name: impl Into<String>, value: bool) -> Self {
        self.with(name, MarkerValue::Bool(value))
    }

    /// Look up a named argument, the last declaration wins
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MarkerValue> {
        self.args
            .iter()
            .rev()
            .find(|(arg, _)| arg == name)
            .map(|(_, value)| value)
    }

    /// String argument by name
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(MarkerValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    /// Integer argument by name
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(MarkerValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Boolean argument by name
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(MarkerValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.class)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            for (i, (name, value)) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name} = {value}")?;
            }
            write!(f, ")")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_argument_wins() {
        let marker = Marker::new("Log")
            .with_str(ARG_MEMBER_PATTERN, "Get*")
            .with_str(ARG_MEMBER_PATTERN, "Set*")
            .with_bool(ARG_EXCLUDE, true);

        assert_eq!(marker.get_str(ARG_MEMBER_PATTERN), Some("Set*"));
        assert_eq!(marker.get_bool(ARG_EXCLUDE), Some(true));
        assert_eq!(marker.get_int(ARG_TARGETS), None);
        assert_eq!(marker.get_str(ARG_EXCLUDE), None);
    }

    #[test]
    fn display() {
        let marker = Marker::new("Log").with_int(ARG_TARGETS, 2);
        assert_eq!(marker.to_string(), "[Log(targets = 2)]");
        assert_eq!(Marker::new("Freeze").to_string(), "[Freeze]");
    }

    #[test]
    fn scope_order() {
        assert!(MarkerScope::Assembly < MarkerScope::Type);
        assert!(MarkerScope::Member < MarkerScope::Parameter);
    }
}
