//! Shared domain types for the dvbpool tuner reservation core.
//!
//! This crate defines the records stored in the shared receiver database
//! and the pure logic that operates on them without touching the store:
//!
//! - [`DvbsMux`], [`DvbcMux`], [`DvbtMux`] and the tagged [`AnyMux`]
//!   variant, with the fuzzy physical-identity matching used to decide
//!   whether two descriptors name the same transponder
//! - [`Lnb`] with its network list, band/polarisation/frequency helpers
//!   and positioner predicates
//! - [`Frontend`] with its capability set and the [`FeSubscription`]
//!   reservation record
//! - [`TuneOptions`] and the error vocabulary surfaced by the scheduler
//!
//! ```rust
//! use dvbpool_types::{DvbsMux, Polarisation};
//!
//! let mut a = DvbsMux::default();
//! a.k.sat_pos = 1920;
//! a.frequency = 11_494_000;
//! a.symbol_rate = 22_000_000;
//! a.pol = Polarisation::H;
//!
//! let mut b = a.clone();
//! b.frequency = 11_493_500; // within the symbol-rate tolerance
//! b.pol = Polarisation::L;  // L/H swap is ignored
//! assert!(a.matches_physical_fuzzy(&b, true));
//! ```

pub mod error;
pub mod fe;
pub mod lnb;
pub mod mux;
pub mod options;

pub use error::ReserveError;
pub use fe::{DeliverySystem, DelsysType, FeKey, FeSubscription, FeSupports, Frontend};
pub use lnb::{
    FeBand, Lnb, LnbKey, LnbNetwork, LnbPolType, LnbType, NetworkHit, RotorControl,
};
pub use mux::{
    AnyMux, DvbcMux, DvbsMux, DvbtMux, Modulation, MuxCommon, MuxKey, MuxPreserve, MuxVariant,
    Polarisation, ScanResult, ScanStatus, TuneSrc, UpdateMuxVerdict, FREQ_TOLERANCE_KHZ,
    SAT_POS_DVBC, SAT_POS_DVBT, SAT_POS_NONE, SAT_POS_TOLERANCE,
};
pub use options::{PlsSearchRange, RetuneMode, SubscriptionType, TuneOptions};
