//! Validation of peer-supplied names used as path components.
//!
//! Agent names become workspace directories and log labels become file
//! names on the collector. Both arrive over the network, so each must be
//! exactly one normal path component that cannot climb out of the storage
//! directory.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Validate that `name` is a single, normal path component.
///
/// `kind` names the value in error messages (`"agent name"`, `"log label"`).
///
/// # Errors
///
/// Returns `AppError::PathViolation` if `name`:
/// - is empty or contains a NUL byte,
/// - contains a path separator,
/// - is `.` or `..`, or is otherwise not a plain file name.
pub fn validate_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::PathViolation(format!("{kind} must not be empty")));
    }

    if name.contains('\0') {
        return Err(AppError::PathViolation(format!(
            "{kind} contains a NUL byte"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(AppError::PathViolation(format!(
            "{kind} '{name}' contains a path separator"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::PathViolation(format!(
            "{kind} '{name}' is not a plain file name"
        ))),
    }
}

/// Join a validated component onto `base`.
///
/// # Errors
///
/// Propagates [`validate_component`] failures.
pub fn join_component(base: &Path, kind: &str, name: &str) -> Result<PathBuf> {
    validate_component(kind, name)?;
    Ok(base.join(name))
}
