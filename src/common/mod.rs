//! Common utilities shared by the library and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Percentage of `done` in `total`, right-aligned as `[ 45%]`
pub fn pad_percent(done: u64, total: u64) -> String {
    let percent = if total == 0 {
        100
    } else {
        (done.saturating_mul(100) / total).min(100)
    };
    format!("[{:>3}%]", percent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_percent() {
        assert_eq!(pad_percent(45, 100), "[ 45%]");
        assert_eq!(pad_percent(1, 3), "[ 33%]");
        assert_eq!(pad_percent(200, 100), "[100%]");
        assert_eq!(pad_percent(0, 0), "[100%]");
        assert_eq!(pad_percent(0, 10), "[  0%]");
    }
}
