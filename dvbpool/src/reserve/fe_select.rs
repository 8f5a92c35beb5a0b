//! Frontend selection for cable and terrestrial tuning.

use rusqlite::Connection;

use dvbpool_types::{DelsysType, FeKey, Frontend};

use crate::db::{self, Result};
use crate::reserve::liveness::is_subscribed;

/// Whether `fe` is a better pick than the current `best`.
///
/// With spectrum requested, FFT-capable hardware beats sweep-capable
/// hardware beats none. Without it, frontends carrying no spectrum
/// hardware are preferred so the scarce hardware stays available for
/// other subscriptions. Priority breaks ties, and `own_tiebreak`
/// prefers the frontend the caller is about to release.
pub(crate) fn fe_beats(
    best: Option<&Frontend>,
    fe: &Frontend,
    need_spectrum: bool,
    own_tiebreak: bool,
) -> bool {
    let Some(best) = best else {
        return !need_spectrum || fe.supports.spectrum_fft || fe.supports.spectrum_sweep;
    };
    if need_spectrum {
        if fe.supports.spectrum_fft {
            !best.supports.spectrum_fft
                || fe.priority > best.priority
                || (fe.priority == best.priority && own_tiebreak)
        } else if fe.supports.spectrum_sweep {
            !best.supports.spectrum_fft && fe.priority > best.priority
        } else {
            false
        }
    } else {
        (best.supports.spectrum_fft && !fe.supports.spectrum_fft)
            || (best.supports.spectrum_sweep
                && !fe.supports.spectrum_fft
                && !fe.supports.spectrum_sweep)
            || fe.priority > best.priority
            || (fe.priority == best.priority && own_tiebreak)
    }
}

/// Pick the best free frontend for a cable or terrestrial tune.
///
/// A frontend qualifies when it is present, usable, enabled for the
/// delivery system, actually supports it, carries the requested
/// capabilities, and its adapter is not already driving another
/// subscription (frontends on one adapter share the demod). The
/// frontend named by `fe_to_release` is treated as if already free.
pub fn find_best_fe_for_dvbc_or_dvbt(
    conn: &Connection,
    fe_to_release: Option<&FeKey>,
    need_blindscan: bool,
    need_spectrum: bool,
    need_multistream: bool,
    delsys_type: DelsysType,
) -> Result<Option<Frontend>> {
    debug_assert!(matches!(delsys_type, DelsysType::DvbC | DelsysType::DvbT));
    let fes = db::list_frontends(conn)?;

    let adapter_in_use = |adapter_no: i32| {
        fes.iter()
            .any(|fe| fe.adapter_no == adapter_no && is_subscribed(fe))
    };

    let mut best: Option<Frontend> = None;
    for fe in &fes {
        if !fe.enabled_for(delsys_type) || !fe.supports_delsys_type(delsys_type) {
            continue;
        }
        let is_our_release = fe_to_release.map_or(false, |k| fe.k == *k);
        if !((!is_subscribed(fe) && !adapter_in_use(fe.adapter_no)) || is_our_release) {
            // This frontend carries someone else's subscription.
            continue;
        }
        if !fe.present || !fe.can_be_used {
            continue;
        }
        if need_blindscan && !fe.supports.blindscan {
            continue;
        }
        if need_multistream && !fe.supports.multistream {
            continue;
        }
        if fe_beats(best.as_ref(), fe, need_spectrum, false) {
            best = Some(fe.clone());
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{put_frontend, Database};
    use dvbpool_types::{DeliverySystem, FeSubscription, FeSupports};

    fn cable_fe(adapter_mac: i64, adapter_no: i32, priority: i32) -> Frontend {
        Frontend {
            k: FeKey {
                adapter_mac_address: adapter_mac,
                frontend_no: 0,
            },
            card_mac_address: 0xCA0,
            adapter_no,
            present: true,
            can_be_used: true,
            priority,
            delivery_systems: vec![DeliverySystem::DvbC, DeliverySystem::DvbT2],
            rf_inputs: vec![0],
            ..Frontend::default()
        }
    }

    #[test]
    fn highest_priority_free_frontend_wins() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_frontend(conn, &cable_fe(0xA0, 0, 1)).unwrap();
        put_frontend(conn, &cable_fe(0xA1, 1, 5)).unwrap();

        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, false, false, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA1);
    }

    #[test]
    fn missing_capability_disqualifies() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        put_frontend(conn, &cable_fe(0xA0, 0, 1)).unwrap();

        assert!(
            find_best_fe_for_dvbc_or_dvbt(conn, None, true, false, false, DelsysType::DvbC)
                .unwrap()
                .is_none()
        );
        let mut blind = cable_fe(0xA1, 1, 0);
        blind.supports.blindscan = true;
        put_frontend(conn, &blind).unwrap();
        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, true, false, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA1);
    }

    #[test]
    fn busy_adapter_is_skipped_unless_released() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut busy = cable_fe(0xA0, 0, 9);
        busy.sub = FeSubscription {
            owner: std::process::id() as i32,
            use_count: 1,
            ..FeSubscription::default()
        };
        put_frontend(conn, &busy).unwrap();
        put_frontend(conn, &cable_fe(0xA1, 1, 1)).unwrap();

        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, false, false, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA1);

        // Releasing the busy frontend makes it the best again.
        let best = find_best_fe_for_dvbc_or_dvbt(
            conn,
            Some(&busy.k),
            false,
            false,
            false,
            DelsysType::DvbC,
        )
        .unwrap()
        .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA0);
    }

    #[test]
    fn spectrum_hardware_is_conserved() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut fft = cable_fe(0xA0, 0, 9);
        fft.supports = FeSupports {
            spectrum_fft: true,
            ..FeSupports::default()
        };
        put_frontend(conn, &fft).unwrap();
        put_frontend(conn, &cable_fe(0xA1, 1, 0)).unwrap();

        // Without a spectrum request the plain frontend is preferred
        // despite its lower priority.
        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, false, false, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA1);

        // With one, only spectrum-capable hardware qualifies.
        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, false, true, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA0);
    }

    #[test]
    fn fft_beats_sweep_when_spectrum_requested() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut sweep = cable_fe(0xA0, 0, 9);
        sweep.supports.spectrum_sweep = true;
        put_frontend(conn, &sweep).unwrap();
        let mut fft = cable_fe(0xA1, 1, 0);
        fft.supports.spectrum_fft = true;
        put_frontend(conn, &fft).unwrap();

        let best =
            find_best_fe_for_dvbc_or_dvbt(conn, None, false, true, false, DelsysType::DvbC)
                .unwrap()
                .unwrap();
        assert_eq!(best.k.adapter_mac_address, 0xA1);
    }
}
