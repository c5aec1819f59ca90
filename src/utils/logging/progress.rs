//! Progress reporting for batch downloads
//!
//! Bars are drawn with indicatif; a template that fails to parse falls back to
//! the library's default style instead of aborting the batch.

use indicatif::{ProgressBar, ProgressStyle};

/// Default style for a main progress bar
pub const DEFAULT_MAIN_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}) {msg}";

/// Style for a spinner without a known length
pub const DEFAULT_SPINNER_TEMPLATE: &str = "{spinner:.green} {elapsed_precise} {msg}";

fn bar_style(template: &str) -> ProgressStyle {
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => style.progress_chars("#>-"),
        Err(e) => {
            log::debug!("Invalid progress template ({e}); using the default style");
            ProgressStyle::default_bar()
        }
    }
}

/// Create a main progress bar with a standardized style
///
/// # Arguments
/// * `length` - Number of tables in the batch
/// * `description` - Optional description to display as the initial message
#[must_use]
pub fn create_main_progress_bar(length: u64, description: Option<&str>) -> ProgressBar {
    let pb = ProgressBar::new(length);
    pb.set_style(bar_style(DEFAULT_MAIN_TEMPLATE));

    if let Some(desc) = description {
        pb.set_message(desc.to_string());
    }

    pb
}

/// Create a spinner for an operation without a known length
#[must_use]
pub fn create_spinner(message: Option<&str>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(DEFAULT_SPINNER_TEMPLATE) {
        pb.set_style(style);
    }

    if let Some(msg) = message {
        pb.set_message(msg.to_string());
    }

    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Finish a progress bar with a completion message
pub fn finish_progress_bar(pb: &ProgressBar, message: Option<&str>) {
    if let Some(msg) = message {
        pb.finish_with_message(msg.to_string());
    } else {
        pb.finish();
    }
}
