//! Mux store lookups: exact key lookups, bidirectional fuzzy frequency
//! search and SI-identifier lookups with uniqueness classification.

use log::debug;
use rusqlite::Connection;

use dvbpool_types::mux::sat_freq_tolerance_khz;
use dvbpool_types::{
    AnyMux, DvbcMux, DvbsMux, DvbtMux, MuxKey, MuxVariant, ReserveError, FREQ_TOLERANCE_KHZ,
    SAT_POS_DVBC, SAT_POS_DVBT, SAT_POS_NONE, SAT_POS_TOLERANCE,
};

use crate::db::{self, FreqCursor, MuxRow, Result, Seek};

/// Find a stored mux that matches `mux` exactly on the
/// `(sat_pos, network_id, ts_id, t2mi_pid)` key prefix and fuzzily in
/// frequency; `extra_id` is disregarded.
pub fn find_by_mux<T: MuxRow>(conn: &Connection, mux: &T) -> Result<Option<T>> {
    // There can be multiple muxes with the same prefix, so the
    // frequency must be confirmed as well.
    for cmux in db::list_muxes_by_partial_key::<T>(conn, mux.key())? {
        if mux.fuzzy_matches(&cmux, true) {
            return Ok(Some(cmux));
        }
    }
    Ok(None)
}

/// One fuzzy pass over the `(sat_pos, pol)` index prefix.
///
/// Walk backward from the `leq` position while the current record
/// still overlaps `mux` under the symbol-rate tolerance, to reach the
/// bottom of the possibly-overlapping range; then walk forward
/// tracking the frequency delta, returning on an exact hit, breaking
/// past the tolerance window, and backing up once the delta starts to
/// rise.
fn find_by_mux_fuzzy_at(
    conn: &Connection,
    mux: &DvbsMux,
    sat_pos: i16,
    ignore_stream_ids: bool,
) -> Result<Option<DvbsMux>> {
    let rows = db::sat_pol_rows(conn, sat_pos, mux.pol)?;
    let mut c = FreqCursor::new(rows, |m: &DvbsMux| m.frequency);

    c.seek(Seek::Leq, mux.frequency);
    let start = c.pos();
    while let Some(db_mux) = c.current() {
        // Muxes with very similar frequencies but different stream ids
        // may sit below the seek position.
        let tolerance = sat_freq_tolerance_khz(mux.symbol_rate, db_mux.symbol_rate);
        if mux.frequency as f64 >= db_mux.frequency as f64 + tolerance {
            // One record too far down; step back up.
            c.next();
            break;
        }
        if c.pos() == Some(0) {
            // The very first record still overlaps; it is the bottom
            // of the range.
            break;
        }
        c.prev();
    }
    if !c.is_valid() {
        if start.is_some() {
            c.set_pos(start);
        } else if !c.seek(Seek::Geq, mux.frequency) {
            // Nothing below or above the wanted frequency on this sat.
            return Ok(None);
        }
    }

    let mut best = f64::INFINITY;
    let mut best_pos: Option<usize> = None;
    while let Some(db_mux) = c.current() {
        if db_mux.frequency == mux.frequency
            && (ignore_stream_ids
                || (db_mux.stream_id == mux.stream_id && db_mux.k.t2mi_pid == mux.k.t2mi_pid))
        {
            return Ok(c.current().cloned());
        }
        let tolerance = sat_freq_tolerance_khz(db_mux.symbol_rate, mux.symbol_rate);
        let diff = mux.frequency as f64 - db_mux.frequency as f64;
        if diff >= tolerance {
            c.next();
            continue;
        }
        if -diff >= tolerance {
            // No overlap and the top of the candidate range is passed.
            break;
        }
        if !ignore_stream_ids
            && (db_mux.stream_id != mux.stream_id || db_mux.k.t2mi_pid != mux.k.t2mi_pid)
        {
            c.next();
            continue;
        }
        // The delta drops on each iteration and rises after the
        // minimum.
        let delta = diff.abs();
        if delta > best {
            break;
        }
        best = delta;
        best_pos = c.pos();
        c.next();
    }
    Ok(best_pos.and_then(|p| {
        c.set_pos(Some(p));
        c.current().cloned()
    }))
}

/// Find a mux with exact polarisation and approximately matching
/// sat position and frequency, disregarding the SI identifiers. With
/// `ignore_stream_ids` the t2mi pid and stream id need not match
/// either.
pub fn find_by_mux_fuzzy(
    conn: &Connection,
    mux: &DvbsMux,
    ignore_stream_ids: bool,
) -> Result<Option<DvbsMux>> {
    // In most cases the mux's own sat position gives the answer.
    if let Some(found) = find_by_mux_fuzzy_at(conn, mux, mux.k.sat_pos, ignore_stream_ids)? {
        return Ok(Some(found));
    }
    for sat in db::sats_near(conn, mux.k.sat_pos, SAT_POS_TOLERANCE)? {
        if sat.sat_pos == mux.k.sat_pos {
            continue;
        }
        debug!("retrying fuzzy mux lookup on neighbouring sat {}", sat.sat_pos);
        if let Some(found) = find_by_mux_fuzzy_at(conn, mux, sat.sat_pos, ignore_stream_ids)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Cable/terrestrial fuzzy lookup on the single frequency axis.
pub fn find_by_freq_fuzzy<T: MuxRow>(
    conn: &Connection,
    frequency: u32,
    tolerance: u32,
) -> Result<Option<T>> {
    let rows = db::freq_ordered_muxes::<T>(conn)?;
    let mut c = FreqCursor::new(rows, |m: &T| m.frequency());

    if !c.seek(Seek::Leq, frequency) && !c.seek(Seek::Geq, frequency) {
        return Ok(None);
    }

    let mut best = i64::MAX;
    let mut best_pos: Option<usize> = None;
    while let Some(m) = c.current() {
        if m.frequency() == frequency {
            return Ok(c.current().cloned());
        }
        let diff = frequency as i64 - m.frequency() as i64;
        if diff > tolerance as i64 {
            c.next();
            continue;
        }
        if -diff > tolerance as i64 {
            break;
        }
        let delta = diff.abs();
        if delta > best {
            break;
        }
        best = delta;
        best_pos = c.pos();
        c.next();
    }
    Ok(best_pos.and_then(|p| {
        c.set_pos(Some(p));
        c.current().cloned()
    }))
}

/// Outcome of a `(network_id, ts_id)` lookup, used when the NIT has
/// not arrived and only SDT identifiers are known.
#[derive(Debug, Clone, PartialEq)]
pub enum NidTidMatch {
    /// Exactly one match overall.
    Unique(AnyMux),
    /// Multiple matches exist but exactly one lies within 0.3 degrees
    /// of the tuned sat position.
    UniqueOnSat(AnyMux),
    /// More than one plausible match.
    NotUnique,
    NotFound,
}

impl NidTidMatch {
    /// Unwrap a match that must be unique; ambiguity is an error.
    pub fn require_unique(
        self,
        network_id: u16,
        ts_id: u16,
    ) -> std::result::Result<Option<AnyMux>, ReserveError> {
        match self {
            NidTidMatch::Unique(mux) | NidTidMatch::UniqueOnSat(mux) => Ok(Some(mux)),
            NidTidMatch::NotFound => Ok(None),
            NidTidMatch::NotUnique => Err(ReserveError::MuxAmbiguous { network_id, ts_id }),
        }
    }
}

fn nid_tid_classify<T: MuxRow>(
    conn: &Connection,
    network_id: u16,
    ts_id: u16,
    check_sat_pos: bool,
    tuned_sat_pos: i16,
) -> Result<NidTidMatch> {
    let rows = db::list_muxes_by_nid_tid::<T>(conn, network_id, ts_id)?;
    if rows.is_empty() {
        return Ok(NidTidMatch::NotFound);
    }
    if rows.len() == 1 {
        let mux = rows.into_iter().next().unwrap();
        return Ok(NidTidMatch::Unique(mux.into_any()));
    }
    if check_sat_pos {
        let mut close = rows.iter().filter(|m| {
            (m.key().sat_pos as i32 - tuned_sat_pos as i32).abs() <= SAT_POS_TOLERANCE as i32
        });
        if let (Some(only), None) = (close.next(), close.next()) {
            return Ok(NidTidMatch::UniqueOnSat(only.clone().into_any()));
        }
    }
    Ok(NidTidMatch::NotUnique)
}

/// Find the mux carrying `(network_id, ts_id)`, disambiguating by the
/// tuned sat position when several satellites carry the identifiers.
/// A `tuned_sat_pos` of [`SAT_POS_NONE`] tries satellite, then cable,
/// then terrestrial.
pub fn get_by_nid_tid_unique(
    conn: &Connection,
    network_id: u16,
    ts_id: u16,
    tuned_sat_pos: i16,
) -> Result<NidTidMatch> {
    match tuned_sat_pos {
        SAT_POS_DVBT => nid_tid_classify::<DvbtMux>(conn, network_id, ts_id, false, tuned_sat_pos),
        SAT_POS_DVBC => nid_tid_classify::<DvbcMux>(conn, network_id, ts_id, false, tuned_sat_pos),
        SAT_POS_NONE => {
            let ret = nid_tid_classify::<DvbsMux>(conn, network_id, ts_id, false, tuned_sat_pos)?;
            if ret != NidTidMatch::NotFound {
                return Ok(ret);
            }
            let ret = nid_tid_classify::<DvbcMux>(conn, network_id, ts_id, false, tuned_sat_pos)?;
            if ret != NidTidMatch::NotFound {
                return Ok(ret);
            }
            nid_tid_classify::<DvbtMux>(conn, network_id, ts_id, false, tuned_sat_pos)
        }
        _ => nid_tid_classify::<DvbsMux>(conn, network_id, ts_id, true, tuned_sat_pos),
    }
}

/// Exact key match first, then fuzzy frequency fallback ignoring the
/// SI identifiers.
pub fn find_dvbs_mux_physical(
    conn: &Connection,
    mux: &DvbsMux,
    ignore_stream_ids: bool,
) -> Result<Option<DvbsMux>> {
    if let Some(found) = find_by_mux(conn, mux)? {
        return Ok(Some(found));
    }
    find_by_mux_fuzzy(conn, mux, ignore_stream_ids)
}

/// Cable/terrestrial counterpart of [`find_dvbs_mux_physical`].
pub fn find_ct_mux_physical<T: MuxRow>(conn: &Connection, mux: &T) -> Result<Option<T>> {
    if let Some(found) = find_by_mux(conn, mux)? {
        return Ok(Some(found));
    }
    find_by_freq_fuzzy(conn, mux.frequency(), FREQ_TOLERANCE_KHZ)
}

/// Physical lookup across the three mux kinds.
pub fn get_by_mux_physical(
    conn: &Connection,
    mux: &AnyMux,
    ignore_stream_ids: bool,
) -> Result<Option<AnyMux>> {
    Ok(match mux {
        AnyMux::Dvbs(m) => {
            find_dvbs_mux_physical(conn, m, ignore_stream_ids)?.map(MuxVariant::into_any)
        }
        AnyMux::Dvbc(m) => find_ct_mux_physical(conn, m)?.map(MuxVariant::into_any),
        AnyMux::Dvbt(m) => find_ct_mux_physical(conn, m)?.map(MuxVariant::into_any),
    })
}

/// Exact lookup by full key; the key's `sat_pos` sentinel selects the
/// table.
pub fn find_mux_by_key(conn: &Connection, key: &MuxKey) -> Result<Option<AnyMux>> {
    Ok(match key.sat_pos {
        SAT_POS_DVBC => db::get_mux_by_key::<DvbcMux>(conn, key)?.map(MuxVariant::into_any),
        SAT_POS_DVBT => db::get_mux_by_key::<DvbtMux>(conn, key)?.map(MuxVariant::into_any),
        SAT_POS_NONE => None,
        _ => db::get_mux_by_key::<DvbsMux>(conn, key)?.map(MuxVariant::into_any),
    })
}
