//! Logging utilities
//!
//! This module provides standardized logging functions for operations.

use std::fmt::Display;

/// Log an operation start with consistent format
///
/// # Arguments
/// * `operation` - Description of the operation
/// * `target` - Location, cache path or table the operation works on
pub fn log_operation_start(operation: &str, target: &dyn Display) {
    log::info!("{operation} {target}");
}

/// Log an operation completion with consistent format
///
/// # Arguments
/// * `operation` - Description of the operation
/// * `target` - Location, cache path or table the operation worked on
/// * `items` - Number of items processed
/// * `elapsed` - Optional elapsed time
pub fn log_operation_complete(
    operation: &str,
    target: &dyn Display,
    items: usize,
    elapsed: Option<std::time::Duration>,
) {
    if let Some(duration) = elapsed {
        log::info!("Successfully {operation} {items} items from {target} in {duration:?}");
    } else {
        log::info!("Successfully {operation} {items} items from {target}");
    }
}

/// Log an operation warning with consistent format
///
/// # Arguments
/// * `message` - Warning message
/// * `target` - Optional location or key related to the warning
pub fn log_warning(message: &str, target: Option<&dyn Display>) {
    if let Some(target) = target {
        log::warn!("{message}: {target}");
    } else {
        log::warn!("{message}");
    }
}
