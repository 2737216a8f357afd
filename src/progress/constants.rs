//! Progress display constants

/// Width of the progress bar display
pub const PROGRESS_BAR_WIDTH: usize = 30;

/// Throttle updates to this many milliseconds
pub const UPDATE_THROTTLE_MS: u128 = 100;

/// Longest path shown after the bar
pub const MAX_PATH_DISPLAY: usize = 48;
