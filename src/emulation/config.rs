//! Execution limits of the in-process host.

/// Native stack reserved per level of managed call depth.
///
/// A managed call nests several interpreter frames on the native stack (the body loop,
/// call dispatch and any hook or delegate in between), and unoptimized builds make each
/// of them large.
pub const NATIVE_STACK_PER_CALL: usize = 128 * 1024;

/// Native stack reserved for the host itself, independent of the call depth
pub const NATIVE_STACK_BASE: usize = 2 * 1024 * 1024;

/// Resource limits applied to every top-level call into a [`crate::emulation::Runtime`].
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `max_call_depth` | 256 |
/// | `max_instructions` | 10 000 000 |
///
/// Every top-level call runs on a worker thread whose stack is sized from
/// `max_call_depth` (see [`EmulationLimits::native_stack_size`]), so exceeding the depth
/// surfaces as [`crate::Error::RecursionLimit`] rather than a native stack overflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Maximum call stack depth.
    ///
    /// Limits nested method calls to prevent stack overflow from
    /// infinite recursion.
    pub max_call_depth: usize,

    /// Maximum instructions to execute per top-level call.
    ///
    /// Set to 0 for unlimited execution.
    pub max_instructions: u64,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits {
            max_call_depth: 256,
            max_instructions: 10_000_000,
        }
    }
}

impl EmulationLimits {
    /// Set the call depth limit
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the instruction limit, 0 for unlimited
    #[must_use]
    pub fn with_max_instructions(mut self, count: u64) -> Self {
        self.max_instructions = count;
        self
    }

    /// Native stack size of the thread running one top-level call
    #[must_use]
    pub fn native_stack_size(&self) -> usize {
        self.max_call_depth
            .saturating_mul(NATIVE_STACK_PER_CALL)
            .saturating_add(NATIVE_STACK_BASE)
    }

    /// Limits for short-running test calls
    #[must_use]
    pub fn strict() -> Self {
        EmulationLimits {
            max_call_depth: 64,
            max_instructions: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let limits = EmulationLimits::default().with_max_call_depth(8).with_max_instructions(0);
        assert_eq!(limits.max_call_depth, 8);
        assert_eq!(limits.max_instructions, 0);
        assert!(
            EmulationLimits::strict().max_instructions < EmulationLimits::default().max_instructions
        );
    }

    #[test]
    fn native_stack_grows_with_depth() {
        let shallow = EmulationLimits::strict().native_stack_size();
        let deep = EmulationLimits::default().native_stack_size();
        assert_eq!(shallow, 64 * NATIVE_STACK_PER_CALL + NATIVE_STACK_BASE);
        assert!(deep > shallow);
        assert_eq!(
            EmulationLimits::default().with_max_call_depth(usize::MAX).native_stack_size(),
            usize::MAX
        );
    }
}
