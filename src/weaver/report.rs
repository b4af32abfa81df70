//! Outcome of a weave pass.

use std::{fmt, time::Duration};

use strum::Display;

use crate::Error;

/// Why a selected member was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SkipReason {
    /// The original body could not be decoded
    Decode,
    /// The rewritten body could not be encoded
    Encode,
    /// A member or type the body refers to is missing from the module
    Lookup,
    /// Generic method definitions are not rewritten
    Generic,
    /// The member uses a construct the rewriter does not handle
    Unsupported,
}

impl SkipReason {
    /// Category of the error that stopped a rewrite
    #[must_use]
    pub fn of(error: &Error) -> SkipReason {
        match error {
            Error::Decode(_)
            | Error::Malformed { .. }
            | Error::OutOfBounds { .. }
            | Error::TokenNotFound(_) => SkipReason::Decode,
            Error::InvalidMnemonic(_)
            | Error::InvalidBranch(_)
            | Error::UnexpectedOperand
            | Error::WrongOperandType { .. }
            | Error::UndefinedLabel(_)
            | Error::DuplicateLabel(_) => SkipReason::Encode,
            Error::TypeNotFound(_) | Error::MemberNotFound(_) => SkipReason::Lookup,
            _ => SkipReason::Unsupported,
        }
    }
}

/// A selected member that was not rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMember {
    /// Member key
    pub member: String,
    /// Category
    pub reason: SkipReason,
    /// Details
    pub message: String,
}

/// A type that failed a structural rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedType {
    /// Fully-qualified type name
    pub type_name: String,
    /// Interceptor class owning the rule
    pub interceptor: String,
    /// Violation message
    pub message: String,
}

/// Summary of one weave pass.
#[derive(Debug, Clone, Default)]
pub struct WeaveReport {
    /// Keys of the methods, constructors and accessors that were rewritten
    pub rewritten: Vec<String>,
    /// Keys of the fields whose accesses were redirected
    pub fields: Vec<String>,
    /// Keys of the events whose raise sites were redirected
    pub events: Vec<String>,
    /// Bodies of unmarked methods that were rewritten for field or event redirection
    pub redirected: Vec<String>,
    /// Members that were selected but not rewritten
    pub skipped: Vec<SkippedMember>,
    /// Types excluded by structural rules
    pub failed_types: Vec<FailedType>,
    /// Names of the generated helper members
    pub helpers: Vec<String>,
    /// Wall-clock duration of the pass
    pub elapsed: Duration,
}

impl WeaveReport {
    /// True if the member with `key` was rewritten
    #[must_use]
    pub fn is_rewritten(&self, key: &str) -> bool {
        self.rewritten.iter().any(|member| member == key)
    }

    /// The skip record of the member with `key`
    #[must_use]
    pub fn skip_of(&self, key: &str) -> Option<&SkippedMember> {
        self.skipped.iter().find(|skipped| skipped.member == key)
    }

    /// True if nothing was changed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewritten.is_empty() && self.fields.is_empty() && self.events.is_empty()
    }
}

impl fmt::Display for WeaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rewritten, {} fields, {} events, {} redirected, {} skipped, {} failed types in {:?}",
            self.rewritten.len(),
            self.fields.len(),
            self.events.len(),
            self.redirected.len(),
            self.skipped.len(),
            self.failed_types.len(),
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups() {
        let report = WeaveReport {
            rewritten: vec!["Demo.A::Run()".to_string()],
            skipped: vec![SkippedMember {
                member: "Demo.A::Map<T>(!!0)".to_string(),
                reason: SkipReason::Generic,
                message: "generic method".to_string(),
            }],
            ..WeaveReport::default()
        };
        assert!(report.is_rewritten("Demo.A::Run()"));
        assert!(!report.is_rewritten("Demo.A::Stop()"));
        assert_eq!(
            report.skip_of("Demo.A::Map<T>(!!0)").map(|s| s.reason),
            Some(SkipReason::Generic)
        );
        assert!(!report.is_empty());
        assert!(report.to_string().starts_with("1 rewritten, 0 fields"));
    }

    #[test]
    fn skip_reasons_follow_the_error() {
        assert_eq!(SkipReason::of(&Error::Decode("bad opcode".to_string())), SkipReason::Decode);
        assert_eq!(SkipReason::of(&Error::UndefinedLabel("L0".to_string())), SkipReason::Encode);
        assert_eq!(SkipReason::of(&Error::MemberNotFound("Run".to_string())), SkipReason::Lookup);
        assert_eq!(
            SkipReason::of(&Error::Unsupported("filter clause".to_string())),
            SkipReason::Unsupported
        );
    }
}
