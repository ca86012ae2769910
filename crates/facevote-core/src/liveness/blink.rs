//! Eye-count blink heuristic.
//!
//! Compares how many eye regions a cascade finds in two consecutive frames.
//! Subtle blinks are frequently missed, so this is a supplementary signal
//! and never a liveness gate on its own.

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::faces::detector::RegionDetector;

const MIN_COUNT_CHANGE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlinkOutcome {
    pub first_eyes: usize,
    pub second_eyes: usize,
    pub state_changed: bool,
}

pub fn counts_indicate_blink(first: usize, second: usize) -> bool {
    first.abs_diff(second) >= MIN_COUNT_CHANGE
}

pub struct BlinkHeuristic<D> {
    eyes: D,
}

impl<D: RegionDetector> BlinkHeuristic<D> {
    pub fn new(eyes: D) -> Self {
        Self { eyes }
    }

    pub fn compare(&self, first: &RgbImage, second: &RgbImage) -> BlinkOutcome {
        let first_eyes = self.eyes.detect_rgb(first).len();
        let second_eyes = self.eyes.detect_rgb(second).len();
        let state_changed = counts_indicate_blink(first_eyes, second_eyes);
        debug!(
            target: "facevote::liveness",
            first_eyes,
            second_eyes,
            state_changed,
            "blink heuristic evaluated"
        );
        BlinkOutcome {
            first_eyes,
            second_eyes,
            state_changed,
        }
    }

    pub fn state_changed(&self, first: &RgbImage, second: &RgbImage) -> bool {
        self.compare(first, second).state_changed
    }
}
