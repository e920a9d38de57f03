//! Progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag shared between a grab and whoever may stop it.
///
/// Cancellation is cooperative: workers poll [`is_cancelled`](Self::is_cancelled)
/// at commit and date-range boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Receives fractional progress in `[0.0, 1.0]`.
pub trait Progress: Send + Sync {
    fn update(&self, fraction: f64);
}

/// Discards progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _fraction: f64) {}
}

/// Adapts an `indicatif` bar with a length of 1000 ticks.
pub struct BarProgress {
    bar: indicatif::ProgressBar,
}

impl BarProgress {
    pub const TICKS: u64 = 1000;

    pub fn new(bar: indicatif::ProgressBar) -> Self {
        bar.set_length(Self::TICKS);
        Self { bar }
    }

    pub fn bar(&self) -> &indicatif::ProgressBar {
        &self.bar
    }
}

impl Progress for BarProgress {
    fn update(&self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.bar.set_position((clamped * Self::TICKS as f64).round() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_bar_progress_clamps() {
        let progress = BarProgress::new(indicatif::ProgressBar::hidden());
        progress.update(0.25);
        assert_eq!(progress.bar().position(), 250);
        progress.update(7.0);
        assert_eq!(progress.bar().position(), BarProgress::TICKS);
        progress.update(-1.0);
        assert_eq!(progress.bar().position(), 0);
    }
}
