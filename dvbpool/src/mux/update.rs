//! Reconciling an incoming mux descriptor with its store counterpart.
//!
//! The merge respects provenance: a descriptor labelled by a more
//! authoritative source overwrites the stored tuning data, a less
//! authoritative one keeps the stored label when the tuning is
//! identical, and `USER` data is never overwritten by automatic
//! rewrites.

use log::debug;
use rusqlite::Connection;

use dvbpool_types::{
    AnyMux, DvbcMux, DvbtMux, MuxCommon, MuxPreserve, MuxVariant, TuneSrc, UpdateMuxVerdict,
    FREQ_TOLERANCE_KHZ,
};

use crate::db::{self, MuxRow, Result};
use crate::mux::find;

/// Selectively replace data in `mux` by data in `db_mux`, honouring
/// the preservation flags and the provenance lattice.
fn merge_muxes<T: MuxVariant>(mux: &mut T, db_mux: &T, preserve: MuxPreserve) {
    debug!(
        "merging mux {:?}/{:?} tune_src {:?}/{:?}",
        mux.key(),
        db_mux.key(),
        mux.common().tune_src,
        db_mux.common().tune_src
    );

    // A template key entered by the user is never considered valid, so
    // the database value wins.
    if preserve.contains(MuxPreserve::MUX_KEY) || mux.is_template() {
        *mux.key_mut() = *db_mux.key();
    }

    let db_src = db_mux.common().tune_src;
    if db_src == TuneSrc::User && mux.common().tune_src != TuneSrc::Auto {
        // The user wants the stored parameters preserved; only an
        // explicit AUTO write turns this off.
        mux.common_mut().tune_src = TuneSrc::User;
        mux.copy_tuning_from(db_mux);
    }

    match mux.common().tune_src {
        TuneSrc::Template => {
            // User-entered tuning data stands, but the label never
            // reaches the store.
            mux.common_mut().tune_src = TuneSrc::Auto;
        }
        // AUTO is the explicit reset: the incoming data stands as-is.
        // USER at this point is either an incoming USER write or the
        // preservation above.
        TuneSrc::Auto | TuneSrc::User => {}
        TuneSrc::Unknown => {
            panic!("mux with UNKNOWN tune_src passed to update_mux");
        }
        incoming_src => {
            // More authoritative stored data wins outright; when the
            // two sources agree on the tuning this reduces to keeping
            // the label saying where the most accurate data came from.
            if db_src != TuneSrc::Unknown && db_src.authority() > incoming_src.authority() {
                mux.copy_tuning_from(db_mux);
                mux.common_mut().tune_src = db_src;
            }
        }
    }

    if preserve.contains(MuxPreserve::SCAN_DATA) {
        let c = mux.common_mut();
        c.scan_result = db_mux.common().scan_result;
        c.scan_duration = db_mux.common().scan_duration;
        c.scan_time = db_mux.common().scan_time;
        c.epg_scan = db_mux.common().epg_scan;
    }
    if preserve.contains(MuxPreserve::SCAN_STATUS) {
        // Only one subscription in one process may scan a mux; two
        // different owners claiming it is a caller bug.
        assert!(
            mux.common().scan_id == db_mux.common().scan_id
                || mux.common().scan_id == 0
                || db_mux.common().scan_id == 0,
            "two subscriptions claim the scan of one mux"
        );
        let c = mux.common_mut();
        c.scan_status = db_mux.common().scan_status;
        c.scan_id = db_mux.common().scan_id;
        assert!(
            c.scan_id != 0 || !c.scan_status.is_owned(),
            "PENDING/ACTIVE scan without an owning scan_id"
        );
    }
    if preserve.contains(MuxPreserve::NUM_SERVICES) {
        mux.common_mut().num_services = db_mux.common().num_services;
    }
    if preserve.contains(MuxPreserve::EPG_TYPES) {
        mux.common_mut().epg_types = db_mux.common().epg_types.clone();
    }
}

fn update_mux_impl<T, F>(
    conn: &Connection,
    mux: &mut T,
    now: i64,
    preserve: MuxPreserve,
    accept: F,
    lookup_fuzzy: impl FnOnce(&Connection, &T) -> Result<Option<T>>,
) -> Result<UpdateMuxVerdict>
where
    T: MuxRow,
    F: FnOnce(Option<&MuxCommon>) -> bool,
{
    let was_template = mux.is_template();
    if was_template && mux.key().extra_id == 0 {
        mux.key_mut().extra_id = db::make_unique_extra_id::<T>(conn, mux.key())?;
    }

    let by_key = find::find_by_mux(conn, mux)?;
    let matched_key = by_key.is_some();
    let db_mux = match by_key {
        Some(found) => Some(found),
        None => lookup_fuzzy(conn, mux)?,
    };

    if !accept(db_mux.as_ref().map(|m| m.common())) {
        return Ok(UpdateMuxVerdict::Unknown);
    }

    let Some(db_mux) = db_mux else {
        // Brand new mux.
        assert!(
            mux.common().tune_src != TuneSrc::Unknown,
            "mux with UNKNOWN tune_src passed to update_mux"
        );
        if mux.common().tune_src == TuneSrc::Template {
            mux.common_mut().tune_src = TuneSrc::Auto;
        }
        mux.common_mut().mtime = now;
        T::put(conn, mux)?;
        return Ok(UpdateMuxVerdict::New);
    };

    merge_muxes(mux, &db_mux, preserve);

    if preserve.contains(MuxPreserve::MTIME) {
        mux.common_mut().mtime = db_mux.common().mtime;
    } else {
        mux.common_mut().mtime = now;
    }

    if matched_key {
        // The prefix matched; adopt the stored extra_id so the write
        // replaces the record it was matched against.
        mux.key_mut().extra_id = db_mux.key().extra_id;
        if *mux == db_mux {
            return Ok(UpdateMuxVerdict::Equal);
        }
        T::put(conn, mux)?;
        return Ok(UpdateMuxVerdict::MatchingSiAndFreq);
    }

    // Matched by frequency only. The incoming key may differ from the
    // stored one.
    if mux.key() != db_mux.key() {
        if db::get_mux_by_key::<T>(conn, mux.key())?.is_some() {
            // The mux's own key is taken by a different carrier;
            // saving would clobber it.
            return Ok(UpdateMuxVerdict::NoMatchingKey);
        }
        db::delete_mux_by_key::<T>(conn, db_mux.key())?;
        on_mux_key_change(conn, db_mux.key(), mux.key())?;
    }
    T::put(conn, mux)?;
    Ok(UpdateMuxVerdict::MatchingFreq)
}

/// Update records that reference a mux by key after the key changed.
fn on_mux_key_change(
    conn: &Connection,
    old_key: &dvbpool_types::MuxKey,
    new_key: &dvbpool_types::MuxKey,
) -> Result<()> {
    let moved = db::move_services_to_key(conn, old_key, new_key)?;
    debug!(
        "mux key change {:?} -> {:?}: {} services moved",
        old_key, new_key, moved
    );
    Ok(())
}

/// Reconcile `mux` with its store counterpart and write the result,
/// all under the caller's write transaction. `accept` sees the stored
/// common block (or `None` when the mux is new) and may abort the
/// save by returning false; `mux` is updated in place with the merged
/// record as written.
pub fn update_mux(
    conn: &Connection,
    mux: &mut AnyMux,
    now: i64,
    preserve: MuxPreserve,
    accept: impl FnOnce(Option<&MuxCommon>) -> bool,
) -> Result<UpdateMuxVerdict> {
    match mux {
        AnyMux::Dvbs(m) => update_mux_impl(conn, m, now, preserve, accept, |conn, m| {
            find::find_by_mux_fuzzy(conn, m, false)
        }),
        AnyMux::Dvbc(m) => update_mux_impl(conn, m, now, preserve, accept, |conn, m| {
            find::find_by_freq_fuzzy::<DvbcMux>(conn, m.frequency, FREQ_TOLERANCE_KHZ)
        }),
        AnyMux::Dvbt(m) => update_mux_impl(conn, m, now, preserve, accept, |conn, m| {
            find::find_by_freq_fuzzy::<DvbtMux>(conn, m.frequency, FREQ_TOLERANCE_KHZ)
        }),
    }
}

/// [`update_mux`] without an accept callback.
pub fn update_mux_always(
    conn: &Connection,
    mux: &mut AnyMux,
    now: i64,
    preserve: MuxPreserve,
) -> Result<UpdateMuxVerdict> {
    update_mux(conn, mux, now, preserve, |_| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use dvbpool_types::{DvbsMux, MuxKey, Polarisation};

    fn sat_mux(network_id: u16, ts_id: u16, frequency: u32, tune_src: TuneSrc) -> DvbsMux {
        DvbsMux {
            k: MuxKey {
                sat_pos: 1920,
                network_id,
                ts_id,
                t2mi_pid: 0,
                extra_id: 0,
            },
            frequency,
            pol: Polarisation::H,
            symbol_rate: 22_000_000,
            stream_id: -1,
            c: MuxCommon {
                tune_src,
                ..MuxCommon::default()
            },
            ..DvbsMux::default()
        }
    }

    #[test]
    fn new_mux_is_inserted_and_template_demoted() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut mux = AnyMux::Dvbs(sat_mux(0, 0, 11_494_000, TuneSrc::Template));

        let verdict = update_mux_always(conn, &mut mux, 1000, MuxPreserve::empty()).unwrap();
        assert_eq!(verdict, UpdateMuxVerdict::New);
        // A template never reaches the store with that label, and it
        // got a unique extra_id.
        assert_eq!(mux.common().tune_src, TuneSrc::Auto);
        assert_ne!(mux.key().extra_id, 0);
        assert_eq!(mux.common().mtime, 1000);
    }

    #[test]
    fn driver_update_never_degrades_nit_data() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut stored = AnyMux::Dvbs(sat_mux(2, 2004, 11_493_500, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut stored, 1, MuxPreserve::empty()).unwrap();

        // The driver reports a slightly different frequency for the
        // same carrier. The NIT data is more authoritative, so both
        // the stored tuning and its label survive.
        let mut incoming = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::Driver));
        let verdict = update_mux_always(conn, &mut incoming, 2, MuxPreserve::empty()).unwrap();
        assert_eq!(verdict, UpdateMuxVerdict::MatchingSiAndFreq);
        assert_eq!(incoming.common().tune_src, TuneSrc::NitActualTuned);
        assert_eq!(incoming.frequency(), 11_493_500);

        // A more authoritative incoming source overwrites.
        let mut nit = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut nit, 3, MuxPreserve::empty()).unwrap();
        assert_eq!(nit.frequency(), 11_494_000);
        assert_eq!(nit.common().tune_src, TuneSrc::NitActualTuned);
    }

    #[test]
    fn user_tuning_is_preserved_against_automatic_rewrites() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut stored = AnyMux::Dvbs(sat_mux(2, 2004, 11_493_500, TuneSrc::User));
        update_mux_always(conn, &mut stored, 1, MuxPreserve::empty()).unwrap();

        let mut incoming = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut incoming, 2, MuxPreserve::empty()).unwrap();
        assert_eq!(incoming.common().tune_src, TuneSrc::User);
        assert_eq!(incoming.frequency(), 11_493_500);

        // An explicit AUTO write turns the preservation off.
        let mut auto = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_200, TuneSrc::Auto));
        update_mux_always(conn, &mut auto, 3, MuxPreserve::empty()).unwrap();
        assert_eq!(auto.frequency(), 11_494_200);
    }

    #[test]
    fn fuzzy_only_match_reports_matching_freq_and_rewrites_key() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut stored = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut stored, 1, MuxPreserve::empty()).unwrap();
        db::put_service(conn, stored.key(), 501, "svc", 0).unwrap();

        // Same carrier, different SI identifiers: the key changes and
        // referencing records follow.
        let mut incoming = AnyMux::Dvbs(sat_mux(9, 9009, 11_494_000, TuneSrc::NitActualTuned));
        let verdict = update_mux_always(conn, &mut incoming, 2, MuxPreserve::empty()).unwrap();
        assert_eq!(verdict, UpdateMuxVerdict::MatchingFreq);
        assert_eq!(db::count_services_on_mux(conn, incoming.key()).unwrap(), 1);
        assert_eq!(db::count_services_on_mux(conn, stored.key()).unwrap(), 0);
    }

    #[test]
    fn update_is_idempotent_with_preserve_all() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut first = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut first, 1000, MuxPreserve::empty()).unwrap();

        let mut again = first.clone();
        let verdict = update_mux_always(conn, &mut again, 2000, MuxPreserve::ALL).unwrap();
        assert_eq!(verdict, UpdateMuxVerdict::Equal);
        assert_eq!(again, first);
    }

    #[test]
    fn accept_callback_aborts_the_save() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut mux = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::Auto));
        let verdict = update_mux(conn, &mut mux, 1, MuxPreserve::empty(), |_| false).unwrap();
        assert_eq!(verdict, UpdateMuxVerdict::Unknown);
        assert!(find::find_by_mux(conn, match &mux {
            AnyMux::Dvbs(m) => m,
            _ => unreachable!(),
        })
        .unwrap()
        .is_none());
    }

    #[test]
    fn provenance_never_regresses() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut stored = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitActualTuned));
        update_mux_always(conn, &mut stored, 1, MuxPreserve::empty()).unwrap();

        // A NIT-other report with identical tuning keeps the stronger
        // label.
        let mut weaker = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::NitOtherNonTuned));
        update_mux_always(conn, &mut weaker, 2, MuxPreserve::empty()).unwrap();
        assert_eq!(weaker.common().tune_src, TuneSrc::NitActualTuned);
    }

    #[test]
    #[should_panic(expected = "UNKNOWN")]
    fn unknown_provenance_is_a_caller_bug() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut mux = AnyMux::Dvbs(sat_mux(2, 2004, 11_494_000, TuneSrc::Unknown));
        let _ = update_mux_always(conn, &mut mux, 1, MuxPreserve::empty());
    }
}
