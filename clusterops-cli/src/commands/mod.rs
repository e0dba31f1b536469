pub mod config;
pub mod scale;
pub mod status;
pub mod upgrade;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a long-running engine call is in flight
pub(crate) fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
