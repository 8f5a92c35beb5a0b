//! Mux (transport stream) descriptors and physical-identity matching.
//!
//! A mux is identified by the composite key `(sat_pos, network_id,
//! ts_id, t2mi_pid, extra_id)` and carries tuning parameters plus a
//! common bookkeeping block. Three concrete kinds exist (satellite,
//! cable, terrestrial); [`AnyMux`] carries exactly one.

use serde::{Deserialize, Serialize};

/// Satellite position sentinel: no position known.
pub const SAT_POS_NONE: i16 = i16::MIN;
/// Satellite position sentinel marking a cable mux key.
pub const SAT_POS_DVBC: i16 = i16::MIN + 1;
/// Satellite position sentinel marking a terrestrial mux key.
pub const SAT_POS_DVBT: i16 = i16::MIN + 2;

/// 0.3 degrees, in units of 0.01 degree.
pub const SAT_POS_TOLERANCE: i16 = 30;

/// Frequency tolerance for cable/terrestrial fuzzy matching, in kHz.
pub const FREQ_TOLERANCE_KHZ: u32 = 1000;

/// Signal polarisation selected by LNB feed voltage.
///
/// The discriminants are chosen so that masking out bit 1 maps L onto H
/// and R onto V, which is how circular/linear swaps are ignored during
/// fuzzy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Polarisation {
    H = 0,
    V = 1,
    L = 2,
    R = 3,
    /// No polarisation: requests exclusive control when used in a
    /// reservation.
    #[default]
    None = 4,
}

impl Polarisation {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::H),
            1 => Some(Self::V),
            2 => Some(Self::L),
            3 => Some(Self::R),
            4 => Some(Self::None),
            _ => None,
        }
    }

    /// Equality ignoring the L/H and R/V swap.
    pub fn matches_fuzzy(self, other: Self) -> bool {
        (self as u8 & !2) == (other as u8 & !2)
    }
}

/// How authoritative a mux's tuning parameters are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TuneSrc {
    /// User-entered placeholder without SI identifiers; never persists
    /// with this label.
    Template = 0,
    #[default]
    Auto = 1,
    Driver = 2,
    NitActualTuned = 3,
    NitActualNonTuned = 4,
    NitOtherNonTuned = 5,
    /// The user wants these parameters preserved against automatic
    /// rewrites.
    User = 6,
    Unknown = 7,
}

impl TuneSrc {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Template),
            1 => Some(Self::Auto),
            2 => Some(Self::Driver),
            3 => Some(Self::NitActualTuned),
            4 => Some(Self::NitActualNonTuned),
            5 => Some(Self::NitOtherNonTuned),
            6 => Some(Self::User),
            7 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Rank on the provenance lattice
    /// `TEMPLATE < AUTO < DRIVER < NIT_OTHER < NIT_ACTUAL < NIT_TUNED < USER`.
    pub fn authority(self) -> u8 {
        match self {
            Self::Template => 0,
            Self::Auto => 1,
            Self::Driver => 2,
            Self::NitOtherNonTuned => 3,
            Self::NitActualNonTuned => 4,
            Self::NitActualTuned => 5,
            Self::User => 6,
            Self::Unknown => 7,
        }
    }
}

/// Scan state of a mux; PENDING and ACTIVE imply a non-zero `scan_id`
/// identifying the owning subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScanStatus {
    #[default]
    Idle = 0,
    Pending = 1,
    Active = 2,
    Retry = 3,
}

impl ScanStatus {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Pending),
            2 => Some(Self::Active),
            3 => Some(Self::Retry),
            _ => None,
        }
    }

    pub fn is_owned(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

/// Outcome of the last completed scan of a mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScanResult {
    #[default]
    None = 0,
    Ok = 1,
    Failed = 2,
    Partial = 3,
    Aborted = 4,
}

impl ScanResult {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Ok),
            2 => Some(Self::Failed),
            3 => Some(Self::Partial),
            4 => Some(Self::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Modulation {
    #[default]
    Auto = 0,
    Qpsk = 1,
    Psk8 = 2,
    Qam16 = 3,
    Qam32 = 4,
    Qam64 = 5,
    Qam128 = 6,
    Qam256 = 7,
}

impl Modulation {
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Auto),
            1 => Some(Self::Qpsk),
            2 => Some(Self::Psk8),
            3 => Some(Self::Qam16),
            4 => Some(Self::Qam32),
            5 => Some(Self::Qam64),
            6 => Some(Self::Qam128),
            7 => Some(Self::Qam256),
            _ => None,
        }
    }
}

/// Composite mux key. `extra_id` disambiguates templates and
/// duplicates that agree on the SI identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MuxKey {
    pub sat_pos: i16,
    pub network_id: u16,
    pub ts_id: u16,
    pub t2mi_pid: u16,
    pub extra_id: u16,
}

/// Bookkeeping shared by all mux kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxCommon {
    pub scan_status: ScanStatus,
    /// Identifies the subscription owning a PENDING/ACTIVE scan; 0
    /// otherwise.
    pub scan_id: i32,
    pub scan_result: ScanResult,
    /// Duration of the last scan, seconds.
    pub scan_duration: u32,
    /// Unix time of the last scan.
    pub scan_time: i64,
    pub epg_scan: bool,
    pub num_services: u16,
    pub epg_types: Vec<u8>,
    pub tune_src: TuneSrc,
    /// Unix time of the last modification.
    pub mtime: i64,
}

impl Default for MuxCommon {
    fn default() -> Self {
        Self {
            scan_status: ScanStatus::Idle,
            scan_id: 0,
            scan_result: ScanResult::None,
            scan_duration: 0,
            scan_time: 0,
            epg_scan: false,
            num_services: 0,
            epg_types: Vec::new(),
            tune_src: TuneSrc::Auto,
            mtime: 0,
        }
    }
}

/// Satellite mux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbsMux {
    pub k: MuxKey,
    /// kHz.
    pub frequency: u32,
    pub pol: Polarisation,
    /// Symbols per second.
    pub symbol_rate: u32,
    /// Multistream id; -1 means single stream.
    pub stream_id: i32,
    pub modulation: Modulation,
    pub c: MuxCommon,
}

impl Default for DvbsMux {
    fn default() -> Self {
        Self {
            k: MuxKey::default(),
            frequency: 0,
            pol: Polarisation::None,
            symbol_rate: 0,
            stream_id: -1,
            modulation: Modulation::Auto,
            c: MuxCommon::default(),
        }
    }
}

/// Cable mux. The key's `sat_pos` is [`SAT_POS_DVBC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbcMux {
    pub k: MuxKey,
    pub frequency: u32,
    pub symbol_rate: u32,
    pub stream_id: i32,
    pub modulation: Modulation,
    pub c: MuxCommon,
}

impl Default for DvbcMux {
    fn default() -> Self {
        Self {
            k: MuxKey {
                sat_pos: SAT_POS_DVBC,
                ..MuxKey::default()
            },
            frequency: 0,
            symbol_rate: 0,
            stream_id: -1,
            modulation: Modulation::Auto,
            c: MuxCommon::default(),
        }
    }
}

/// Terrestrial mux. The key's `sat_pos` is [`SAT_POS_DVBT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvbtMux {
    pub k: MuxKey,
    pub frequency: u32,
    /// Channel bandwidth, kHz.
    pub bandwidth: u32,
    pub stream_id: i32,
    pub modulation: Modulation,
    pub c: MuxCommon,
}

impl Default for DvbtMux {
    fn default() -> Self {
        Self {
            k: MuxKey {
                sat_pos: SAT_POS_DVBT,
                ..MuxKey::default()
            },
            frequency: 0,
            bandwidth: 8000,
            stream_id: -1,
            modulation: Modulation::Auto,
            c: MuxCommon::default(),
        }
    }
}

/// Frequency overlap tolerance for two satellite carriers, kHz: half
/// the narrower carrier's bandwidth at a 1.35 roll-off.
pub fn sat_freq_tolerance_khz(symbol_rate_a: u32, symbol_rate_b: u32) -> f64 {
    symbol_rate_a.min(symbol_rate_b) as f64 * 1.35 / 2000.0
}

impl DvbsMux {
    /// True iff `self` and `other` name the same physical carrier:
    /// polarisations equal ignoring the L/H and R/V swap, equal stream
    /// ids, sat positions within 0.3 degrees (when `check_sat_pos`)
    /// and frequencies within the symbol-rate tolerance.
    pub fn matches_physical_fuzzy(&self, other: &DvbsMux, check_sat_pos: bool) -> bool {
        if !self.pol.matches_fuzzy(other.pol) {
            return false;
        }
        if check_sat_pos
            && (self.k.sat_pos as i32 - other.k.sat_pos as i32).abs() > SAT_POS_TOLERANCE as i32
        {
            return false;
        }
        if self.stream_id != other.stream_id {
            return false;
        }
        let tolerance = sat_freq_tolerance_khz(self.symbol_rate, other.symbol_rate);
        (self.frequency as f64 - other.frequency as f64).abs() <= tolerance
    }

    /// Exact equality of all tuning parameters.
    pub fn tuning_is_same(&self, other: &DvbsMux) -> bool {
        self.frequency == other.frequency
            && self.pol == other.pol
            && self.symbol_rate == other.symbol_rate
            && self.stream_id == other.stream_id
            && self.modulation == other.modulation
    }

    pub fn is_template(&self) -> bool {
        self.c.tune_src == TuneSrc::Template
    }
}

impl DvbcMux {
    pub fn matches_physical_fuzzy(&self, other: &DvbcMux) -> bool {
        (self.frequency as i64 - other.frequency as i64).abs() <= FREQ_TOLERANCE_KHZ as i64
    }

    pub fn tuning_is_same(&self, other: &DvbcMux) -> bool {
        self.frequency == other.frequency
            && self.symbol_rate == other.symbol_rate
            && self.stream_id == other.stream_id
            && self.modulation == other.modulation
    }

    pub fn is_template(&self) -> bool {
        self.c.tune_src == TuneSrc::Template
    }
}

impl DvbtMux {
    pub fn matches_physical_fuzzy(&self, other: &DvbtMux) -> bool {
        (self.frequency as i64 - other.frequency as i64).abs() <= FREQ_TOLERANCE_KHZ as i64
    }

    pub fn tuning_is_same(&self, other: &DvbtMux) -> bool {
        self.frequency == other.frequency
            && self.bandwidth == other.bandwidth
            && self.stream_id == other.stream_id
            && self.modulation == other.modulation
    }

    pub fn is_template(&self) -> bool {
        self.c.tune_src == TuneSrc::Template
    }
}

/// Dispatch surface shared by the three mux kinds. Code generic over
/// the delivery system (store lookups, merge) works through this trait;
/// everything else matches on [`AnyMux`] exhaustively.
pub trait MuxVariant: Sized + Clone + PartialEq + std::fmt::Debug {
    const DELSYS: crate::fe::DelsysType;

    fn key(&self) -> &MuxKey;
    fn key_mut(&mut self) -> &mut MuxKey;
    fn common(&self) -> &MuxCommon;
    fn common_mut(&mut self) -> &mut MuxCommon;
    fn frequency(&self) -> u32;
    fn stream_id(&self) -> i32;
    fn fuzzy_matches(&self, other: &Self, check_sat_pos: bool) -> bool;
    fn tuning_is_same(&self, other: &Self) -> bool;
    /// Copy all tuning parameters (not the key, not the common block)
    /// from `other`.
    fn copy_tuning_from(&mut self, other: &Self);
    fn into_any(self) -> AnyMux;
    fn from_any(mux: AnyMux) -> Option<Self>;

    fn is_template(&self) -> bool {
        self.common().tune_src == TuneSrc::Template
    }
}

impl MuxVariant for DvbsMux {
    const DELSYS: crate::fe::DelsysType = crate::fe::DelsysType::DvbS;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn key_mut(&mut self) -> &mut MuxKey {
        &mut self.k
    }
    fn common(&self) -> &MuxCommon {
        &self.c
    }
    fn common_mut(&mut self) -> &mut MuxCommon {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        self.stream_id
    }
    fn fuzzy_matches(&self, other: &Self, check_sat_pos: bool) -> bool {
        self.matches_physical_fuzzy(other, check_sat_pos)
    }
    fn tuning_is_same(&self, other: &Self) -> bool {
        DvbsMux::tuning_is_same(self, other)
    }
    fn copy_tuning_from(&mut self, other: &Self) {
        self.frequency = other.frequency;
        self.pol = other.pol;
        self.symbol_rate = other.symbol_rate;
        self.stream_id = other.stream_id;
        self.modulation = other.modulation;
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Dvbs(self)
    }
    fn from_any(mux: AnyMux) -> Option<Self> {
        match mux {
            AnyMux::Dvbs(m) => Some(m),
            _ => None,
        }
    }
}

impl MuxVariant for DvbcMux {
    const DELSYS: crate::fe::DelsysType = crate::fe::DelsysType::DvbC;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn key_mut(&mut self) -> &mut MuxKey {
        &mut self.k
    }
    fn common(&self) -> &MuxCommon {
        &self.c
    }
    fn common_mut(&mut self) -> &mut MuxCommon {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        self.stream_id
    }
    fn fuzzy_matches(&self, other: &Self, _check_sat_pos: bool) -> bool {
        self.matches_physical_fuzzy(other)
    }
    fn tuning_is_same(&self, other: &Self) -> bool {
        DvbcMux::tuning_is_same(self, other)
    }
    fn copy_tuning_from(&mut self, other: &Self) {
        self.frequency = other.frequency;
        self.symbol_rate = other.symbol_rate;
        self.stream_id = other.stream_id;
        self.modulation = other.modulation;
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Dvbc(self)
    }
    fn from_any(mux: AnyMux) -> Option<Self> {
        match mux {
            AnyMux::Dvbc(m) => Some(m),
            _ => None,
        }
    }
}

impl MuxVariant for DvbtMux {
    const DELSYS: crate::fe::DelsysType = crate::fe::DelsysType::DvbT;

    fn key(&self) -> &MuxKey {
        &self.k
    }
    fn key_mut(&mut self) -> &mut MuxKey {
        &mut self.k
    }
    fn common(&self) -> &MuxCommon {
        &self.c
    }
    fn common_mut(&mut self) -> &mut MuxCommon {
        &mut self.c
    }
    fn frequency(&self) -> u32 {
        self.frequency
    }
    fn stream_id(&self) -> i32 {
        self.stream_id
    }
    fn fuzzy_matches(&self, other: &Self, _check_sat_pos: bool) -> bool {
        self.matches_physical_fuzzy(other)
    }
    fn tuning_is_same(&self, other: &Self) -> bool {
        DvbtMux::tuning_is_same(self, other)
    }
    fn copy_tuning_from(&mut self, other: &Self) {
        self.frequency = other.frequency;
        self.bandwidth = other.bandwidth;
        self.stream_id = other.stream_id;
        self.modulation = other.modulation;
    }
    fn into_any(self) -> AnyMux {
        AnyMux::Dvbt(self)
    }
    fn from_any(mux: AnyMux) -> Option<Self> {
        match mux {
            AnyMux::Dvbt(m) => Some(m),
            _ => None,
        }
    }
}

/// A mux of any delivery system; carries exactly one concrete kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyMux {
    Dvbs(DvbsMux),
    Dvbc(DvbcMux),
    Dvbt(DvbtMux),
}

impl AnyMux {
    pub fn key(&self) -> &MuxKey {
        match self {
            AnyMux::Dvbs(m) => &m.k,
            AnyMux::Dvbc(m) => &m.k,
            AnyMux::Dvbt(m) => &m.k,
        }
    }

    pub fn key_mut(&mut self) -> &mut MuxKey {
        match self {
            AnyMux::Dvbs(m) => &mut m.k,
            AnyMux::Dvbc(m) => &mut m.k,
            AnyMux::Dvbt(m) => &mut m.k,
        }
    }

    pub fn common(&self) -> &MuxCommon {
        match self {
            AnyMux::Dvbs(m) => &m.c,
            AnyMux::Dvbc(m) => &m.c,
            AnyMux::Dvbt(m) => &m.c,
        }
    }

    pub fn common_mut(&mut self) -> &mut MuxCommon {
        match self {
            AnyMux::Dvbs(m) => &mut m.c,
            AnyMux::Dvbc(m) => &mut m.c,
            AnyMux::Dvbt(m) => &mut m.c,
        }
    }

    pub fn frequency(&self) -> u32 {
        match self {
            AnyMux::Dvbs(m) => m.frequency,
            AnyMux::Dvbc(m) => m.frequency,
            AnyMux::Dvbt(m) => m.frequency,
        }
    }

    pub fn stream_id(&self) -> i32 {
        match self {
            AnyMux::Dvbs(m) => m.stream_id,
            AnyMux::Dvbc(m) => m.stream_id,
            AnyMux::Dvbt(m) => m.stream_id,
        }
    }

    pub fn is_template(&self) -> bool {
        self.common().tune_src == TuneSrc::Template
    }

    /// True iff both carry the same kind and match physically.
    pub fn matches_physical_fuzzy(&self, other: &AnyMux, check_sat_pos: bool) -> bool {
        match (self, other) {
            (AnyMux::Dvbs(a), AnyMux::Dvbs(b)) => a.matches_physical_fuzzy(b, check_sat_pos),
            (AnyMux::Dvbc(a), AnyMux::Dvbc(b)) => a.matches_physical_fuzzy(b),
            (AnyMux::Dvbt(a), AnyMux::Dvbt(b)) => a.matches_physical_fuzzy(b),
            _ => false,
        }
    }

    pub fn tuning_is_same(&self, other: &AnyMux) -> bool {
        match (self, other) {
            (AnyMux::Dvbs(a), AnyMux::Dvbs(b)) => a.tuning_is_same(b),
            (AnyMux::Dvbc(a), AnyMux::Dvbc(b)) => a.tuning_is_same(b),
            (AnyMux::Dvbt(a), AnyMux::Dvbt(b)) => a.tuning_is_same(b),
            _ => false,
        }
    }
}

bitflags::bitflags! {
    /// Fields of a stored mux that a caller of `update_mux` wants kept
    /// from the database rather than taken from the incoming record.
    pub struct MuxPreserve: u32 {
        const SCAN_DATA = 0x1;
        const SCAN_STATUS = 0x2;
        const NUM_SERVICES = 0x4;
        const EPG_TYPES = 0x8;
        const TUNE_SRC = 0x10;
        const MUX_KEY = 0x20;
        const MTIME = 0x100;
        const ALL = 0xffff;
        const MUX_COMMON = Self::SCAN_DATA.bits | Self::SCAN_STATUS.bits
            | Self::NUM_SERVICES.bits | Self::EPG_TYPES.bits | Self::TUNE_SRC.bits;
    }
}

/// How `update_mux` reconciled an incoming mux with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMuxVerdict {
    /// Not reconciled; the caller's accept callback aborted the save.
    Unknown,
    /// Key matched and the frequency was close.
    MatchingSiAndFreq,
    /// A mux with a close frequency exists but with different SI
    /// identifiers.
    MatchingFreq,
    /// Saving would require a key change that would collide with
    /// another stored mux.
    NoMatchingKey,
    /// The mux is new.
    New,
    /// The mux exists and matches in all parameters; nothing changed.
    Equal,
}
