//! # System Constants
//!
//! Fixed identifiers and default configuration values shared between the
//! reactor core and its collaborators (instruction handlers and the upstream
//! acknowledgment transport).

/// Reserved instructor ID denoting instructions originated by the local node.
///
/// Locally originated instructions are never reported upstream for
/// acknowledgment.
pub const LOCAL_INSTRUCTOR_ID: &str = "LOCAL";

/// Result-parameter key carrying a machine-readable error code.
pub const ERROR_CODE_RESULT_PARAM: &str = "code";

/// Result-parameter key carrying a human-readable message.
pub const MESSAGE_RESULT_PARAM: &str = "message";

/// Error code applied when an instruction is declined because it remained
/// unresolved past the maximum incomplete age.
pub const ERROR_CODE_INSTRUCTION_EXPIRED: &str = "IEXJ.001";

/// Default maximum age, in hours, an instruction may remain in `Received` or
/// `Executing` before it is forcibly declined.
pub const DEFAULT_MAXIMUM_INCOMPLETE_HOURS: u32 = 168;

/// Default retention window, in hours, for terminal instructions before the
/// cleaner job purges them.
pub const DEFAULT_CLEANER_RETENTION_HOURS: u32 = 72;

/// Default maximum length for a single status result-parameter value.
///
/// Longer values are truncated in the middle before persistence, to work
/// around exceedingly long error messages.
pub const DEFAULT_MAX_RESULT_PARAM_LENGTH: usize = 1024;
