//! Options steering a tuning/reservation request.

use serde::{Deserialize, Serialize};

/// What kind of reservation the subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionType {
    /// Regular viewing: resources reserved non-exclusively, other LNBs
    /// on the same dish stay usable.
    #[default]
    Normal,
    /// Background mux scanning; also non-exclusive.
    Scan,
    /// The subscriber controls the LNB alone: free to rotate the dish
    /// and flip diseqc switches. No other subscription may share it.
    LnbExclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetuneMode {
    /// Retune if lock failed or the wrong sat was detected.
    #[default]
    Auto,
    Never,
    IfNotLocked,
    Unchanged,
}

/// Physical-layer-scrambling code range searched during a blind tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlsSearchRange {
    pub start: i32,
    pub end: i32,
    pub timeout_ms: u32,
}

impl Default for PlsSearchRange {
    fn default() -> Self {
        Self {
            start: -1,
            end: -1,
            timeout_ms: 25,
        }
    }
}

impl PlsSearchRange {
    pub fn is_empty(&self) -> bool {
        self.start < 0 || self.end < self.start
    }
}

/// Policy knobs consulted by the scheduler. The retune mode and PLS
/// range are carried through to the tuning layer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuneOptions {
    pub subscription_type: SubscriptionType,
    pub retune_mode: RetuneMode,
    pub need_blind_tune: bool,
    pub need_spectrum: bool,
    pub may_move_dish: bool,
    pub pls_search_range: PlsSearchRange,
    /// Subtracted from an LNB's priority when using it would move the
    /// dish.
    pub dish_move_penalty: i32,
    /// Added to a frontend's priority when the LNB, cable or dish is
    /// already held by another of our subscriptions.
    pub resource_reuse_bonus: i32,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            subscription_type: SubscriptionType::Normal,
            retune_mode: RetuneMode::Auto,
            need_blind_tune: false,
            need_spectrum: false,
            may_move_dish: true,
            pls_search_range: PlsSearchRange::default(),
            dish_move_penalty: 0,
            resource_reuse_bonus: 0,
        }
    }
}
