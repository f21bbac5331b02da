pub mod danger;
pub mod path_guard;
pub mod validator;

pub use danger::{Classification, DangerCatalog, DangerPattern, RiskTier, Severity};
pub use path_guard::{Access, DenyReason, PathDenied, PathGuard};
pub use validator::{InputKind, ValidationError};
