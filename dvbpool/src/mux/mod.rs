//! The mux lookup and merge engine.
//!
//! Physical identity matching is pure logic and lives in
//! `dvbpool-types`; this module adds the store lookups (exact, fuzzy
//! and SI-identifier based) and the provenance-respecting merge path.

pub mod find;
pub mod update;

pub use find::{
    find_by_freq_fuzzy, find_by_mux, find_by_mux_fuzzy, find_dvbs_mux_physical,
    find_ct_mux_physical, find_mux_by_key, get_by_mux_physical, get_by_nid_tid_unique,
    NidTidMatch,
};
pub use update::{update_mux, update_mux_always};
