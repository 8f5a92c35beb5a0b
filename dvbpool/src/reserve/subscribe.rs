//! Subscription commit: record reservations atomically, maintain
//! use-counts, release previously held frontends.
//!
//! Every verb here runs under the caller's write transaction, so a
//! reservation cannot fail once the arbitration returned a candidate,
//! and release+acquire pairs are observed atomically by other
//! processes.

use log::{debug, warn};
use rusqlite::Connection;
use serde::Serialize;

use dvbpool_types::{
    DvbsMux, FeBand, FeKey, FeSubscription, Frontend, Lnb, LnbKey, MuxVariant, Polarisation,
    ReserveError, TuneOptions, SAT_POS_DVBC, SAT_POS_DVBT, SAT_POS_NONE, SAT_POS_TOLERANCE,
};

use crate::db::{self, DatabaseError};
use crate::reserve::lnb_select::{
    find_best_fe_for_lnb, find_fe_and_lnb_for_mux, SubscriptionCounts,
};
use crate::reserve::fe_select::find_best_fe_for_dvbc_or_dvbt;
use crate::reserve::liveness::{is_subscribed, owner_is_alive};
use crate::Error;

fn our_pid() -> i32 {
    std::process::id() as i32
}

/// A reservation held by a dead process is rewritten to the cleared
/// state on the next commit path.
fn reclaim_if_dead(fe: &mut Frontend) {
    if fe.sub.use_count > 0 && !is_subscribed(fe) {
        warn!(
            "reclaiming frontend {:#x}/{} from dead pid {}",
            fe.k.adapter_mac_address, fe.k.frontend_no, fe.sub.owner
        );
        fe.sub = FeSubscription::default();
    }
}

/// A completed satellite reservation.
#[derive(Debug, Clone, Serialize)]
pub struct SatReservation {
    pub fe: Frontend,
    pub lnb: Lnb,
    /// Contention counts after the release and including our new
    /// reservation.
    pub counts: SubscriptionCounts,
    /// Remaining use count of the released frontend, 0 if none was
    /// released.
    pub released_use_count: u32,
}

/// Release one use of a frontend. When the use count reaches zero the
/// subscription record is cleared. A record owned by a dead process is
/// cleared outright; that recovery is silent.
pub fn unsubscribe(conn: &Connection, fe_key: &FeKey) -> Result<u32, Error> {
    let mut fe = db::get_frontend(conn, fe_key)?
        .ok_or(DatabaseError::FrontendNotFound(*fe_key))?;

    if fe.sub.owner >= 0 && !owner_is_alive(fe.sub.owner) {
        warn!(
            "reclaiming frontend {:#x}/{} from dead pid {}",
            fe.k.adapter_mac_address, fe.k.frontend_no, fe.sub.owner
        );
        fe.sub = FeSubscription::default();
        db::put_frontend(conn, &fe)?;
        return Ok(0);
    }
    if fe.sub.use_count == 0 {
        // Already free; releasing again is a no-op.
        fe.sub = FeSubscription::default();
        db::put_frontend(conn, &fe)?;
        return Ok(0);
    }

    fe.sub.use_count -= 1;
    debug!(
        "adapter {} {}kHz use_count={}",
        fe.adapter_no,
        fe.sub.frequency / 1000,
        fe.sub.use_count
    );
    if fe.sub.use_count == 0 {
        fe.sub = FeSubscription::default();
    }
    let remaining = fe.sub.use_count;
    db::put_frontend(conn, &fe)?;
    Ok(remaining)
}

/// Join a compatible non-exclusive reservation already held on `fe_key`
/// (several subscribers sharing one LNB on the same band/pol).
pub fn subscribe_fe_in_use(
    conn: &Connection,
    fe_key: &FeKey,
    fe_to_release: Option<&FeKey>,
) -> Result<(Frontend, u32), Error> {
    let mut fe = db::get_frontend(conn, fe_key)?
        .ok_or(DatabaseError::FrontendNotFound(*fe_key))?;
    if !is_subscribed(&fe) || fe.sub.is_exclusive() {
        return Err(ReserveError::NoFrontendAvailable.into());
    }
    fe.sub.use_count += 1;
    debug!(
        "adapter {} {}kHz use_count={}",
        fe.adapter_no,
        fe.sub.frequency / 1000,
        fe.sub.use_count
    );

    let released_use_count = match fe_to_release {
        Some(key) => unsubscribe(conn, key)?,
        None => 0,
    };
    db::put_frontend(conn, &fe)?;
    Ok((fe, released_use_count))
}

/// Write a non-exclusive band/pol/sat reservation into `fe`.
fn reserve_fe_lnb_band_pol_sat(
    conn: &Connection,
    fe: &mut Frontend,
    lnb: &Lnb,
    band: FeBand,
    pol: Polarisation,
    usals_pos: i16,
    frequency: u32,
    stream_id: i32,
) -> Result<(), Error> {
    // Re-read in case of external changes since the arbitration.
    *fe = db::get_frontend(conn, &fe.k)?
        .ok_or(DatabaseError::FrontendNotFound(fe.k))?;
    reclaim_if_dead(fe);
    debug_assert_eq!(fe.sub.use_count, 0);
    fe.sub = FeSubscription {
        owner: our_pid(),
        use_count: 1,
        lnb_key: lnb.k,
        pol,
        band,
        usals_pos,
        frequency,
        stream_id,
    };
    debug!(
        "adapter {} {}kHz use_count={}",
        fe.adapter_no,
        fe.sub.frequency / 1000,
        fe.sub.use_count
    );
    db::put_frontend(conn, fe)?;
    Ok(())
}

/// Reserve the best LNB+frontend for tuning `mux` and record the
/// subscription, releasing `fe_to_release` in the same transaction.
pub fn subscribe_lnb_band_pol_sat(
    conn: &Connection,
    mux: &DvbsMux,
    required_lnb: Option<&Lnb>,
    fe_to_release: Option<&FeKey>,
    options: &TuneOptions,
) -> Result<SatReservation, Error> {
    let selection = find_fe_and_lnb_for_mux(conn, mux, required_lnb, fe_to_release, options)?;

    let released_use_count = match fe_to_release {
        Some(key) => unsubscribe(conn, key)?,
        None => 0,
    };

    let Some(mut selection) = selection else {
        return Err(no_lnb_error(mux, required_lnb, options));
    };

    let band = selection.lnb.band_for_mux(mux);
    reserve_fe_lnb_band_pol_sat(
        conn,
        &mut selection.fe,
        &selection.lnb,
        band,
        mux.pol,
        selection.usals_pos,
        mux.frequency,
        mux.stream_id,
    )?;
    let mut counts = selection.counts;
    counts.lnb += 1;
    counts.tuner += 1;
    counts.dish += 1;
    counts.rf_coupler += 1;
    Ok(SatReservation {
        fe: selection.fe,
        lnb: selection.lnb,
        counts,
        released_use_count,
    })
}

/// Diagnose why no LNB+frontend pair could be found.
fn no_lnb_error(mux: &DvbsMux, required_lnb: Option<&Lnb>, options: &TuneOptions) -> Error {
    let Some(lnb) = required_lnb else {
        return ReserveError::NoFrontendAvailable.into();
    };
    let Some(hit) = lnb.has_network(mux.k.sat_pos) else {
        return ReserveError::LnbCannotTuneMux(format!(
            "no network for sat position {}",
            mux.k.sat_pos
        ))
        .into();
    };
    if lnb.on_positioner()
        && hit.usals_move_amount >= SAT_POS_TOLERANCE as i32
        && (!options.may_move_dish || !lnb.can_move_dish())
    {
        return ReserveError::DishMoveForbidden.into();
    }
    if !lnb.can_tune_to_mux(mux, false) {
        return ReserveError::LnbCannotTuneMux(format!(
            "frequency {} kHz / polarisation {:?} out of range",
            mux.frequency, mux.pol
        ))
        .into();
    }
    ReserveError::NoFrontendAvailable.into()
}

/// Reserve `lnb` exclusively: the subscriber is free to rotate the
/// dish and flip diseqc switches, and nobody else can share the LNB.
/// Spectrum acquisition passes `need_spectrum` to demand FFT/sweep
/// hardware.
pub fn subscribe_lnb_exclusive(
    conn: &Connection,
    lnb: &Lnb,
    fe_to_release: Option<&FeKey>,
    need_blind_tune: bool,
    need_spectrum: bool,
) -> Result<(Frontend, u32), Error> {
    // The sentinels request exclusive control of pol, band and rotor.
    let pol = Polarisation::None;
    let band = FeBand::None;
    let usals_pos = SAT_POS_NONE;
    let need_multistream = false;

    let best = find_best_fe_for_lnb(
        conn,
        lnb,
        fe_to_release,
        need_blind_tune,
        need_spectrum,
        need_multistream,
        pol,
        band,
        usals_pos,
    )?;

    let released_use_count = match fe_to_release {
        Some(key) => unsubscribe(conn, key)?,
        None => 0,
    };

    let Some(mut fe) = best else {
        return Err(ReserveError::NoFrontendAvailable.into());
    };

    fe = db::get_frontend(conn, &fe.k)?.ok_or(DatabaseError::FrontendNotFound(fe.k))?;
    reclaim_if_dead(&mut fe);
    debug_assert_eq!(fe.sub.use_count, 0);
    fe.sub = FeSubscription {
        owner: our_pid(),
        use_count: 1,
        lnb_key: lnb.k,
        pol,
        band,
        usals_pos,
        frequency: 0,
        stream_id: -1,
    };
    db::put_frontend(conn, &fe)?;
    Ok((fe, released_use_count))
}

/// Reserve a frontend for a cable or terrestrial mux.
pub fn subscribe_dvbc_or_dvbt_mux<T: MuxVariant>(
    conn: &Connection,
    mux: &T,
    fe_to_release: Option<&FeKey>,
    use_blind_tune: bool,
) -> Result<(Frontend, u32), Error> {
    let need_spectrum = false;
    let need_multistream = mux.stream_id() >= 0;
    let delsys_type = T::DELSYS;
    let is_dvbc = delsys_type == dvbpool_types::DelsysType::DvbC;
    debug_assert!(delsys_type != dvbpool_types::DelsysType::DvbS);

    let best = find_best_fe_for_dvbc_or_dvbt(
        conn,
        fe_to_release,
        use_blind_tune,
        need_spectrum,
        need_multistream,
        delsys_type,
    )?;

    let released_use_count = match fe_to_release {
        Some(key) => unsubscribe(conn, key)?,
        None => 0,
    };

    let Some(mut fe) = best else {
        return Err(ReserveError::NoFrontendAvailable.into());
    };

    fe = db::get_frontend(conn, &fe.k)?.ok_or(DatabaseError::FrontendNotFound(fe.k))?;
    reclaim_if_dead(&mut fe);
    debug_assert_eq!(fe.sub.use_count, 0);
    fe.sub = FeSubscription {
        owner: our_pid(),
        use_count: 1,
        lnb_key: LnbKey::default(),
        pol: Polarisation::None,
        band: FeBand::None,
        usals_pos: if is_dvbc { SAT_POS_DVBC } else { SAT_POS_DVBT },
        frequency: mux.frequency(),
        stream_id: mux.stream_id(),
    };
    db::put_frontend(conn, &fe)?;
    Ok((fe, released_use_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{put_frontend, put_lnb, Database};
    use dvbpool_types::{DeliverySystem, DvbcMux, LnbNetwork, MuxKey};

    const CARD: i64 = 0xCA4D;

    fn sat_fe(adapter_mac: i64, adapter_no: i32) -> Frontend {
        Frontend {
            k: FeKey {
                adapter_mac_address: adapter_mac,
                frontend_no: 0,
            },
            card_mac_address: CARD,
            adapter_no,
            present: true,
            can_be_used: true,
            delivery_systems: vec![
                DeliverySystem::DvbS,
                DeliverySystem::DvbS2,
                DeliverySystem::DvbC,
            ],
            rf_inputs: vec![0],
            ..Frontend::default()
        }
    }

    fn lnb_at(sat_pos: i16) -> Lnb {
        let mut lnb = Lnb::universal(LnbKey {
            card_mac_address: CARD,
            rf_input: 0,
            dish_id: 0,
            lnb_id: 1,
        });
        lnb.usals_pos = sat_pos;
        lnb.networks.push(LnbNetwork {
            sat_pos,
            priority: -1,
            usals_pos: sat_pos,
        });
        lnb
    }

    fn mux_at(sat_pos: i16, frequency: u32) -> DvbsMux {
        DvbsMux {
            k: MuxKey {
                sat_pos,
                network_id: 1,
                ts_id: 1,
                ..MuxKey::default()
            },
            frequency,
            pol: Polarisation::H,
            symbol_rate: 22_000_000,
            stream_id: -1,
            ..DvbsMux::default()
        }
    }

    #[test]
    fn first_subscription_records_full_reservation() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_lnb(conn, &lnb_at(1920)).unwrap();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();

        let res = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 11_494_000),
            None,
            None,
            &TuneOptions::default(),
        )
        .unwrap();
        assert_eq!(res.fe.sub.owner, our_pid());
        assert_eq!(res.fe.sub.use_count, 1);
        assert_eq!(res.fe.sub.pol, Polarisation::H);
        assert_eq!(res.fe.sub.band, FeBand::Low);
        assert_eq!(res.fe.sub.usals_pos, 1920);
        assert_eq!(res.fe.sub.frequency, 11_494_000);
        assert_eq!(res.released_use_count, 0);
        assert_eq!(res.counts.lnb, 1);

        // The reservation is visible in the store.
        let stored = db::get_frontend(conn, &res.fe.k).unwrap().unwrap();
        assert_eq!(stored.sub, res.fe.sub);
    }

    #[test]
    fn unsubscribe_to_zero_clears_the_record() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_lnb(conn, &lnb_at(1920)).unwrap();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();

        let res = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 11_494_000),
            None,
            None,
            &TuneOptions::default(),
        )
        .unwrap();

        let (fe, _) = subscribe_fe_in_use(conn, &res.fe.k, None).unwrap();
        assert_eq!(fe.sub.use_count, 2);

        assert_eq!(unsubscribe(conn, &fe.k).unwrap(), 1);
        assert_eq!(unsubscribe(conn, &fe.k).unwrap(), 0);
        let stored = db::get_frontend(conn, &fe.k).unwrap().unwrap();
        assert_eq!(stored.sub, FeSubscription::default());
    }

    #[test]
    fn exclusive_cannot_join_and_errors_surface() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let lnb = lnb_at(1920);
        put_lnb(conn, &lnb).unwrap();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();

        let (fe, _) = subscribe_lnb_exclusive(conn, &lnb, None, false, false).unwrap();
        assert_eq!(fe.sub.pol, Polarisation::None);
        assert_eq!(fe.sub.band, FeBand::None);
        assert_eq!(fe.sub.usals_pos, SAT_POS_NONE);

        assert!(matches!(
            subscribe_fe_in_use(conn, &fe.k, None),
            Err(Error::Reserve(ReserveError::NoFrontendAvailable))
        ));
    }

    #[test]
    fn release_and_acquire_happen_in_one_step() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_lnb(conn, &lnb_at(1920)).unwrap();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();
        put_frontend(conn, &sat_fe(0xA1, 1)).unwrap();

        let first = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 11_494_000),
            None,
            None,
            &TuneOptions::default(),
        )
        .unwrap();

        // Retune to another transponder, releasing the old frontend.
        let second = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 11_538_000),
            None,
            Some(&first.fe.k),
            &TuneOptions::default(),
        )
        .unwrap();
        assert_eq!(second.released_use_count, 0);
        assert_eq!(second.fe.sub.frequency, 11_538_000);

        // Exactly one reservation exists afterwards; release and
        // acquire were one atomic step.
        let reserved = db::list_frontends(conn)
            .unwrap()
            .iter()
            .filter(|fe| fe.sub.use_count > 0)
            .count();
        assert_eq!(reserved, 1);
    }

    #[test]
    fn required_lnb_failures_are_diagnosed() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let lnb = lnb_at(1920);
        put_lnb(conn, &lnb).unwrap();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();

        // No network entry for the requested sat.
        let err = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1300, 11_494_000),
            Some(&lnb),
            None,
            &TuneOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Reserve(ReserveError::LnbCannotTuneMux(_))
        ));

        // Frequency outside the LNB's input range.
        let err = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 3_800_000),
            Some(&lnb),
            None,
            &TuneOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Reserve(ReserveError::LnbCannotTuneMux(_))
        ));
    }

    #[test]
    fn cable_subscription_uses_the_sentinel() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_frontend(conn, &sat_fe(0xA0, 0)).unwrap();

        let mux = DvbcMux {
            frequency: 346_000,
            ..DvbcMux::default()
        };
        let (fe, released) = subscribe_dvbc_or_dvbt_mux(conn, &mux, None, false).unwrap();
        assert_eq!(released, 0);
        assert_eq!(fe.sub.usals_pos, SAT_POS_DVBC);
        assert_eq!(fe.sub.lnb_key, LnbKey::default());
        assert_eq!(fe.sub.frequency, 346_000);
    }

    #[test]
    fn dead_owner_is_reclaimed_silently() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_lnb(conn, &lnb_at(1920)).unwrap();
        let mut fe = sat_fe(0xA0, 0);
        fe.sub = FeSubscription {
            owner: i32::MAX - 1,
            use_count: 1,
            pol: Polarisation::V,
            band: FeBand::High,
            usals_pos: 1300,
            ..FeSubscription::default()
        };
        put_frontend(conn, &fe).unwrap();

        // The scheduler treats the defunct reservation as free.
        let res = subscribe_lnb_band_pol_sat(
            conn,
            &mux_at(1920, 11_494_000),
            None,
            None,
            &TuneOptions::default(),
        )
        .unwrap();
        assert_eq!(res.fe.k, fe.k);
        assert_eq!(res.fe.sub.owner, our_pid());
        assert_eq!(res.fe.sub.use_count, 1);
    }
}
