//! Errors surfaced to reservation callers.
//!
//! Matching and lookup failures are values, not errors; these variants
//! cover the cases where a request cannot be satisfied at all.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    /// No frontend passes the capability filters and conflict
    /// analysis.
    #[error("no frontend available")]
    NoFrontendAvailable,

    /// The requested mux is outside the LNB's frequency or
    /// polarisation range.
    #[error("LNB cannot tune to mux: {0}")]
    LnbCannotTuneMux(String),

    /// The positioner would have to move but policy forbids it.
    #[error("dish movement forbidden by policy")]
    DishMoveForbidden,

    /// A unique mux was required but the (network_id, ts_id) lookup
    /// was ambiguous.
    #[error("mux lookup ambiguous: network_id={network_id}, ts_id={ts_id}")]
    MuxAmbiguous { network_id: u16, ts_id: u16 },
}
