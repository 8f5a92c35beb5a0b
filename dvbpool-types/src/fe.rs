//! Frontend (demodulator) records and their reservation state.

use serde::{Deserialize, Serialize};

use crate::lnb::{FeBand, LnbKey};
use crate::mux::{Polarisation, SAT_POS_NONE};

/// Identifies one frontend on one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeKey {
    pub adapter_mac_address: i64,
    pub frontend_no: u8,
}

impl Default for FeKey {
    fn default() -> Self {
        Self {
            adapter_mac_address: -1,
            frontend_no: 0,
        }
    }
}

/// Delivery systems a frontend may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliverySystem {
    DvbS = 0,
    DvbS2 = 1,
    DvbC = 2,
    DvbT = 3,
    DvbT2 = 4,
}

impl DeliverySystem {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::DvbS),
            1 => Some(Self::DvbS2),
            2 => Some(Self::DvbC),
            3 => Some(Self::DvbT),
            4 => Some(Self::DvbT2),
            _ => None,
        }
    }

    pub fn delsys_type(self) -> DelsysType {
        match self {
            Self::DvbS | Self::DvbS2 => DelsysType::DvbS,
            Self::DvbC => DelsysType::DvbC,
            Self::DvbT | Self::DvbT2 => DelsysType::DvbT,
        }
    }
}

/// The three delivery-system families the scheduler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelsysType {
    DvbS,
    DvbC,
    DvbT,
}

/// Optional frontend capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeSupports {
    pub blindscan: bool,
    pub multistream: bool,
    pub spectrum_fft: bool,
    pub spectrum_sweep: bool,
}

/// The reservation held by a frontend. `use_count == 0` iff the record
/// is cleared; a polarisation/band/usals sentinel marks an exclusive
/// reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeSubscription {
    /// Pid of the owning process; -1 when unreserved.
    pub owner: i32,
    pub use_count: u32,
    pub lnb_key: LnbKey,
    pub pol: Polarisation,
    pub band: FeBand,
    pub usals_pos: i16,
    /// Informational.
    pub frequency: u32,
    /// Informational.
    pub stream_id: i32,
}

impl Default for FeSubscription {
    fn default() -> Self {
        Self {
            owner: -1,
            use_count: 0,
            lnb_key: LnbKey::default(),
            pol: Polarisation::None,
            band: FeBand::None,
            usals_pos: SAT_POS_NONE,
            frequency: 0,
            stream_id: -1,
        }
    }
}

impl FeSubscription {
    /// Whether this reservation pins the whole LNB/dish: any sentinel
    /// in (pol, band, usals_pos) means the owner wants to freely flip
    /// switches or rotate the dish.
    pub fn is_exclusive(&self) -> bool {
        self.pol == Polarisation::None || self.band == FeBand::None || self.usals_pos == SAT_POS_NONE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontend {
    pub k: FeKey,
    pub card_mac_address: i64,
    /// Kernel adapter number; -1 when the hardware is missing.
    pub adapter_no: i32,
    /// Dense per-card number maintained by device discovery.
    pub card_no: i32,
    pub adapter_name: String,
    pub card_short_name: String,
    pub present: bool,
    pub can_be_used: bool,
    pub enable_dvbs: bool,
    pub enable_dvbc: bool,
    pub enable_dvbt: bool,
    pub priority: i32,
    pub delivery_systems: Vec<DeliverySystem>,
    /// RF inputs on the card this frontend can be switched to.
    pub rf_inputs: Vec<u8>,
    pub supports: FeSupports,
    pub sub: FeSubscription,
}

impl Default for Frontend {
    fn default() -> Self {
        Self {
            k: FeKey::default(),
            card_mac_address: -1,
            adapter_no: -1,
            card_no: -1,
            adapter_name: String::new(),
            card_short_name: String::new(),
            present: false,
            can_be_used: false,
            enable_dvbs: true,
            enable_dvbc: true,
            enable_dvbt: true,
            priority: 0,
            delivery_systems: Vec::new(),
            rf_inputs: Vec::new(),
            supports: FeSupports::default(),
            sub: FeSubscription::default(),
        }
    }
}

impl Frontend {
    pub fn supports_delsys_type(&self, t: DelsysType) -> bool {
        self.delivery_systems.iter().any(|d| d.delsys_type() == t)
    }

    pub fn enabled_for(&self, t: DelsysType) -> bool {
        match t {
            DelsysType::DvbS => self.enable_dvbs,
            DelsysType::DvbC => self.enable_dvbc,
            DelsysType::DvbT => self.enable_dvbt,
        }
    }
}
