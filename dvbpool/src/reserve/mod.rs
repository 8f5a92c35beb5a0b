//! The reservation scheduler.
//!
//! Frontends, LNBs, RF cables and dishes are shared resources with
//! interdependent constraints: frontends fed by one cable must agree
//! on polarisation and band, LNBs on one positioner must agree on the
//! sat position, and exclusive subscriptions pin the whole signal
//! path. The arbitration here decides, atomically under the store's
//! write transaction, whether a request can be satisfied and with what
//! resources.

pub mod fe_select;
pub mod liveness;
pub mod lnb_select;
pub mod subscribe;

pub use fe_select::find_best_fe_for_dvbc_or_dvbt;
pub use liveness::{is_subscribed, owner_is_alive};
pub use lnb_select::{
    find_best_fe_for_lnb, find_fe_and_lnb_for_mux, subscription_counts, LnbSelection,
    SubscriptionCounts,
};
pub use subscribe::{
    subscribe_dvbc_or_dvbt_mux, subscribe_fe_in_use, subscribe_lnb_band_pol_sat,
    subscribe_lnb_exclusive, unsubscribe, SatReservation,
};
