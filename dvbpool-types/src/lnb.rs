//! LNB records: the downconverter at a dish's feedhorn, the networks
//! (satellite positions) it can reach, and the band/polarisation
//! helpers used by the reservation scheduler.

use serde::{Deserialize, Serialize};

use crate::mux::{DvbsMux, Polarisation, SAT_POS_NONE, SAT_POS_TOLERANCE};

/// Identifies one LNB: the card it is cabled to, the RF input it
/// feeds, the dish it sits on and a per-dish id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LnbKey {
    pub card_mac_address: i64,
    pub rf_input: u8,
    /// -1 means the LNB is on a dish of its own.
    pub dish_id: i32,
    pub lnb_id: i32,
}

impl Default for LnbKey {
    fn default() -> Self {
        Self {
            card_mac_address: -1,
            rf_input: 0,
            dish_id: -1,
            lnb_id: -1,
        }
    }
}

/// How (and whether) this LNB's dish can be rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RotorControl {
    #[default]
    Fixed = 0,
    /// Sends USALS positioning commands.
    MasterUsals = 1,
    /// Sends diseqc 1.2 positioning commands.
    MasterDiseqc12 = 2,
    /// On a positioner driven by another LNB's cable.
    Slave = 3,
}

impl RotorControl {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Fixed),
            1 => Some(Self::MasterUsals),
            2 => Some(Self::MasterDiseqc12),
            3 => Some(Self::Slave),
            _ => None,
        }
    }
}

/// Which polarisations the LNB can output, and whether the voltage
/// mapping is swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LnbPolType {
    #[default]
    Hv = 0,
    /// Linear with swapped voltage mapping.
    Vh = 1,
    Lr = 2,
    /// Circular with swapped voltage mapping.
    Rl = 3,
    H = 4,
    V = 5,
    L = 6,
    R = 7,
}

impl LnbPolType {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Hv),
            1 => Some(Self::Vh),
            2 => Some(Self::Lr),
            3 => Some(Self::Rl),
            4 => Some(Self::H),
            5 => Some(Self::V),
            6 => Some(Self::L),
            7 => Some(Self::R),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LnbType {
    #[default]
    Universal = 0,
    C = 1,
    KuWideband = 2,
}

impl LnbType {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Universal),
            1 => Some(Self::C),
            2 => Some(Self::KuWideband),
            _ => None,
        }
    }
}

/// One satellite position an LNB can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnbNetwork {
    pub sat_pos: i16,
    /// Per-network priority; -1 means "consult the LNB's priority".
    pub priority: i32,
    /// Dish position to command for this network.
    pub usals_pos: i16,
}

/// Result of looking up a satellite position in an LNB's network list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHit {
    /// Per-network priority; -1 means "consult the LNB's priority".
    pub priority: i32,
    /// How far the dish would have to travel, 0.01 degree units; 0 for
    /// LNBs not on a positioner.
    pub usals_move_amount: i32,
    /// Dish position to command.
    pub usals_pos: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lnb {
    pub k: LnbKey,
    pub lnb_type: LnbType,
    pub rotor_control: RotorControl,
    pub pol_type: LnbPolType,
    /// Local oscillator frequencies, kHz.
    pub lof_low: u32,
    pub lof_high: u32,
    /// Input frequency range, kHz; `freq_mid` of 0 means a single-band
    /// LNB.
    pub freq_low: u32,
    pub freq_mid: u32,
    pub freq_high: u32,
    pub priority: i32,
    pub enabled: bool,
    pub can_be_used: bool,
    /// Where the dish currently points; mirrored into every LNB on the
    /// same dish when the dish moves.
    pub usals_pos: i16,
    /// Cached from the frontend records by device discovery.
    pub adapter_name: String,
    pub networks: Vec<LnbNetwork>,
}

impl Default for Lnb {
    fn default() -> Self {
        Self::universal(LnbKey::default())
    }
}

impl Lnb {
    /// A universal Ku-band LNB: 9.75/10.6 GHz oscillators, 10.7-12.75
    /// GHz input, band switch at 11.7 GHz.
    pub fn universal(k: LnbKey) -> Self {
        Self {
            k,
            lnb_type: LnbType::Universal,
            rotor_control: RotorControl::Fixed,
            pol_type: LnbPolType::Hv,
            lof_low: 9_750_000,
            lof_high: 10_600_000,
            freq_low: 10_700_000,
            freq_mid: 11_700_000,
            freq_high: 12_750_000,
            priority: -1,
            enabled: true,
            can_be_used: true,
            usals_pos: SAT_POS_NONE,
            adapter_name: String::new(),
            networks: Vec::new(),
        }
    }

    /// A C-band LNB: single band, 5.15 GHz oscillator.
    pub fn c_band(k: LnbKey) -> Self {
        Self {
            lnb_type: LnbType::C,
            lof_low: 5_150_000,
            lof_high: 0,
            freq_low: 3_400_000,
            freq_mid: 0,
            freq_high: 4_200_000,
            ..Self::universal(k)
        }
    }

    pub fn on_positioner(&self) -> bool {
        matches!(
            self.rotor_control,
            RotorControl::MasterUsals | RotorControl::MasterDiseqc12 | RotorControl::Slave
        )
    }

    /// Whether this LNB's cable can emit positioner commands. Slave
    /// LNBs sit on a moving dish but cannot drive it.
    pub fn can_move_dish(&self) -> bool {
        matches!(
            self.rotor_control,
            RotorControl::MasterUsals | RotorControl::MasterDiseqc12
        )
    }

    /// Look up `sat_pos` in the network list.
    pub fn has_network(&self, sat_pos: i16) -> Option<NetworkHit> {
        let network = self.networks.iter().find(|n| n.sat_pos == sat_pos)?;
        let usals_move_amount = if self.on_positioner() && self.usals_pos != SAT_POS_NONE {
            (network.usals_pos as i32 - self.usals_pos as i32).abs()
        } else if self.on_positioner() {
            // Dish position unknown; any tune will command a move.
            i32::MAX
        } else {
            0
        };
        Some(NetworkHit {
            priority: network.priority,
            usals_move_amount,
            usals_pos: network.usals_pos,
        })
    }

    /// An LNB on a fixed mount never needs (or gets) a dish move.
    pub fn dish_needs_to_be_moved(&self, sat_pos: i16) -> bool {
        if !self.on_positioner() {
            return false;
        }
        match self.has_network(sat_pos) {
            Some(hit) => hit.usals_move_amount != 0,
            None => true,
        }
    }

    pub fn frequency_range(&self) -> (u32, u32) {
        (self.freq_low, self.freq_high)
    }

    /// Which band the 22 kHz tone selects for `frequency`.
    pub fn band_for_freq(&self, frequency: u32) -> FeBand {
        if self.freq_mid != 0 && frequency >= self.freq_mid {
            FeBand::High
        } else {
            FeBand::Low
        }
    }

    pub fn band_for_mux(&self, mux: &DvbsMux) -> FeBand {
        self.band_for_freq(mux.frequency)
    }

    /// Whether the voltage mapping is swapped (V selects 18V, H 13V).
    pub fn swapped_pol(&self) -> bool {
        matches!(self.pol_type, LnbPolType::Vh | LnbPolType::Rl)
    }

    pub fn can_pol(&self, pol: Polarisation) -> bool {
        match self.pol_type {
            LnbPolType::Hv | LnbPolType::Vh => {
                matches!(pol, Polarisation::H | Polarisation::V)
            }
            LnbPolType::Lr | LnbPolType::Rl => {
                matches!(pol, Polarisation::L | Polarisation::R)
            }
            LnbPolType::H => pol == Polarisation::H,
            LnbPolType::V => pol == Polarisation::V,
            LnbPolType::L => pol == Polarisation::L,
            LnbPolType::R => pol == Polarisation::R,
        }
    }

    /// Whether this LNB can receive `mux` at all: frequency within its
    /// input range, polarisation it can output and (unless
    /// `disregard_networks`) a network entry for the mux's satellite.
    pub fn can_tune_to_mux(&self, mux: &DvbsMux, disregard_networks: bool) -> bool {
        let (low, high) = self.frequency_range();
        if mux.frequency < low || mux.frequency > high {
            return false;
        }
        if !self.can_pol(mux.pol) {
            return false;
        }
        if !disregard_networks && self.has_network(mux.k.sat_pos).is_none() {
            return false;
        }
        true
    }

    /// Intermediate frequency the driver sees after local oscillator
    /// compensation, kHz.
    pub fn driver_freq_for_freq(&self, frequency: u32) -> u32 {
        let lof = match self.band_for_freq(frequency) {
            FeBand::High => self.lof_high,
            _ => self.lof_low,
        };
        (frequency as i64 - lof as i64).unsigned_abs() as u32
    }
}

/// Which sub-spectrum the LNB feeds to the cable; selected by the
/// 22 kHz tone together with the feed voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FeBand {
    Low = 0,
    High = 1,
    /// No band: requests exclusive control when used in a reservation.
    #[default]
    None = 2,
}

impl FeBand {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Low),
            1 => Some(Self::High),
            2 => Some(Self::None),
            _ => None,
        }
    }
}

/// Two dish positions count as the same pointing when within 0.3
/// degrees; at or beyond that the dish would have to be moved.
pub fn usals_is_close(sat_pos_a: i16, sat_pos_b: i16) -> bool {
    (sat_pos_a as i32 - sat_pos_b as i32).abs() < SAT_POS_TOLERANCE as i32
}
