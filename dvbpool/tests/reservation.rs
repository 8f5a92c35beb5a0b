//! End-to-end reservation scenarios against a fresh shared store.

use dvbpool::db::{self, Database};
use dvbpool::mux::{find_by_mux, update_mux_always};
use dvbpool::reserve::{
    subscribe_fe_in_use, subscribe_lnb_band_pol_sat, subscribe_lnb_exclusive, unsubscribe,
};
use dvbpool::Error;
use dvbpool_types::{
    DeliverySystem, DvbsMux, FeBand, FeKey, FeSubscription, Frontend, Lnb, LnbKey, LnbNetwork,
    MuxCommon, MuxKey, MuxPreserve, Polarisation, ReserveError, RotorControl, TuneOptions,
    TuneSrc, UpdateMuxVerdict, SAT_POS_NONE,
};

const CARD: i64 = 0x001122334455;

fn fresh_store() -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::open_in_memory().unwrap()
}

fn pid() -> i32 {
    std::process::id() as i32
}

fn sat_fe(adapter_mac: i64, adapter_no: i32, rf_inputs: &[u8]) -> Frontend {
    Frontend {
        k: FeKey {
            adapter_mac_address: adapter_mac,
            frontend_no: 0,
        },
        card_mac_address: CARD,
        adapter_no,
        present: true,
        can_be_used: true,
        delivery_systems: vec![DeliverySystem::DvbS, DeliverySystem::DvbS2],
        rf_inputs: rf_inputs.to_vec(),
        ..Frontend::default()
    }
}

fn lnb(rf_input: u8, dish_id: i32, lnb_id: i32, sat_pos: i16) -> Lnb {
    let mut lnb = Lnb::universal(LnbKey {
        card_mac_address: CARD,
        rf_input,
        dish_id,
        lnb_id,
    });
    lnb.usals_pos = sat_pos;
    lnb.networks.push(LnbNetwork {
        sat_pos,
        priority: -1,
        usals_pos: sat_pos,
    });
    lnb
}

fn mux(sat_pos: i16, frequency: u32, pol: Polarisation) -> DvbsMux {
    DvbsMux {
        k: MuxKey {
            sat_pos,
            network_id: 2,
            ts_id: 2004,
            ..MuxKey::default()
        },
        frequency,
        pol,
        symbol_rate: 22_000_000,
        stream_id: -1,
        ..DvbsMux::default()
    }
}

/// S1: the first satellite subscription gets the only frontend and a
/// fully populated reservation record.
#[test]
fn first_satellite_subscription() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_lnb(&txn, &lnb(0, 1, 1, 1920)).unwrap();

    let res = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();
    txn.commit().unwrap();

    assert_eq!(res.fe.k.adapter_mac_address, 0xFE1);
    assert_eq!(res.lnb.k.lnb_id, 1);
    let sub = res.fe.sub;
    assert_eq!(sub.owner, pid());
    assert_eq!(sub.use_count, 1);
    assert_eq!(sub.lnb_key, res.lnb.k);
    assert_eq!(sub.pol, Polarisation::H);
    assert_eq!(sub.band, FeBand::Low);
    assert_eq!(sub.usals_pos, 1920);
    assert_eq!(sub.frequency, 11_494_000);
}

/// S2: two LNBs on one cable (same coupler group) must agree on
/// band/pol/sat; a V/high request cannot ride on a cable carrying
/// H/low.
#[test]
fn cable_conflict_rejects_disagreeing_band_pol() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE2, 1, &[0, 1])).unwrap();
    let l1 = lnb(0, 1, 1, 1920);
    let l2 = lnb(1, 2, 2, 1920);
    db::put_lnb(&txn, &l1).unwrap();
    db::put_lnb(&txn, &l2).unwrap();
    db::set_rf_coupler(&txn, CARD, 0, 1).unwrap();
    db::set_rf_coupler(&txn, CARD, 1, 1).unwrap();

    subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    let err = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 12_000_000, Polarisation::V),
        Some(&l2),
        None,
        &TuneOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Reserve(ReserveError::NoFrontendAvailable)
    ));
}

/// S3: a second subscription with the same (pol, band, usals) shares
/// the LNB through a second frontend on the same card; the use counts
/// stay independent.
#[test]
fn compatible_subscriptions_share_the_lnb() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE2, 1, &[0])).unwrap();
    db::put_lnb(&txn, &lnb(0, 1, 1, 1920)).unwrap();

    let first = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    let mut second_mux = mux(1920, 11_538_000, Polarisation::H);
    second_mux.k.ts_id = 2010;
    let second = subscribe_lnb_band_pol_sat(
        &txn,
        &second_mux,
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    assert_ne!(first.fe.k, second.fe.k);
    assert_eq!(first.fe.sub.use_count, 1);
    assert_eq!(second.fe.sub.use_count, 1);
    assert_eq!(second.fe.sub.lnb_key, first.fe.sub.lnb_key);
}

/// S4: two LNBs on one dish cannot point it at two satellites; with
/// dish movement forbidden the far request is rejected.
#[test]
fn dish_contention_rejects_far_request() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE2, 1, &[0, 1])).unwrap();
    let mut l1 = lnb(0, 1, 1, 1920);
    l1.rotor_control = RotorControl::MasterUsals;
    let mut l3 = lnb(1, 1, 3, 1920);
    l3.rotor_control = RotorControl::MasterUsals;
    l3.networks.push(LnbNetwork {
        sat_pos: 1300,
        priority: -1,
        usals_pos: 1300,
    });
    db::put_lnb(&txn, &l1).unwrap();
    db::put_lnb(&txn, &l3).unwrap();

    subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    let options = TuneOptions {
        may_move_dish: false,
        ..TuneOptions::default()
    };
    let err = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1300, 11_494_000, Polarisation::H),
        Some(&l3),
        None,
        &options,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Reserve(ReserveError::DishMoveForbidden)));
}

/// S5: an exclusive reservation cannot preempt a live subscription,
/// but succeeds once the holder is gone and records the sentinels.
#[test]
fn exclusive_waits_for_the_lnb_to_free_up() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE2, 1, &[0])).unwrap();
    let l1 = lnb(0, 1, 1, 1920);
    db::put_lnb(&txn, &l1).unwrap();

    let first = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    let err = subscribe_lnb_exclusive(&txn, &l1, None, false, false).unwrap_err();
    assert!(matches!(
        err,
        Error::Reserve(ReserveError::NoFrontendAvailable)
    ));

    assert_eq!(unsubscribe(&txn, &first.fe.k).unwrap(), 0);
    let (fe, _) = subscribe_lnb_exclusive(&txn, &l1, None, false, false).unwrap();
    assert_eq!(fe.sub.pol, Polarisation::None);
    assert_eq!(fe.sub.band, FeBand::None);
    assert_eq!(fe.sub.usals_pos, SAT_POS_NONE);
}

/// S6: a driver-labelled report close in frequency merges into the
/// stored NIT record without degrading its tuning data.
#[test]
fn fuzzy_merge_keeps_the_authoritative_tuning() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();

    let mut db_mux = dvbpool_types::AnyMux::Dvbs(DvbsMux {
        frequency: 11_493_500,
        c: MuxCommon {
            tune_src: TuneSrc::NitActualTuned,
            ..MuxCommon::default()
        },
        ..mux(1920, 11_493_500, Polarisation::H)
    });
    update_mux_always(&txn, &mut db_mux, 1, MuxPreserve::empty()).unwrap();

    let mut incoming = dvbpool_types::AnyMux::Dvbs(DvbsMux {
        c: MuxCommon {
            tune_src: TuneSrc::Driver,
            ..MuxCommon::default()
        },
        ..mux(1920, 11_494_000, Polarisation::H)
    });
    let verdict = update_mux_always(&txn, &mut incoming, 2, MuxPreserve::empty()).unwrap();
    assert_eq!(verdict, UpdateMuxVerdict::MatchingSiAndFreq);
    assert_eq!(incoming.common().tune_src, TuneSrc::NitActualTuned);

    let stored = find_by_mux(
        &txn,
        &mux(1920, 11_493_500, Polarisation::H),
    )
    .unwrap()
    .unwrap();
    assert_eq!(stored.frequency, 11_493_500);
    assert_eq!(stored.c.tune_src, TuneSrc::NitActualTuned);
}

/// S7: a reservation owned by a dead process is treated as free and
/// silently reclaimed by the next subscription.
#[test]
fn crashed_owner_is_reclaimed() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    let mut fe = sat_fe(0xFE1, 0, &[0]);
    fe.sub = FeSubscription {
        owner: i32::MAX - 1,
        use_count: 3,
        pol: Polarisation::V,
        band: FeBand::High,
        usals_pos: 1300,
        ..FeSubscription::default()
    };
    db::put_frontend(&txn, &fe).unwrap();
    db::put_lnb(&txn, &lnb(0, 1, 1, 1920)).unwrap();

    let res = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();
    assert_eq!(res.fe.k, fe.k);
    assert_eq!(res.fe.sub.owner, pid());
    assert_eq!(res.fe.sub.use_count, 1);
}

/// Invariant 1: once the use count returns to zero the subscription
/// record compares equal to the cleared value.
#[test]
fn unsubscribe_to_zero_restores_the_zero_value() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_lnb(&txn, &lnb(0, 1, 1, 1920)).unwrap();

    let res = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();
    let (joined, _) = subscribe_fe_in_use(&txn, &res.fe.k, None).unwrap();
    assert_eq!(joined.sub.use_count, 2);

    unsubscribe(&txn, &res.fe.k).unwrap();
    unsubscribe(&txn, &res.fe.k).unwrap();
    let cleared = db::get_frontend(&txn, &res.fe.k).unwrap().unwrap();
    assert_eq!(cleared.sub, FeSubscription::default());
}

/// Invariants 2 and 3: live subscriptions on one LNB or one coupler
/// group never disagree on (pol, band, usals).
#[test]
fn no_disagreeing_live_subscriptions_on_shared_paths() {
    let mut store = fresh_store();
    let txn = store.write_txn().unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE1, 0, &[0])).unwrap();
    db::put_frontend(&txn, &sat_fe(0xFE2, 1, &[0])).unwrap();
    let l1 = lnb(0, 1, 1, 1920);
    db::put_lnb(&txn, &l1).unwrap();

    subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::H),
        None,
        None,
        &TuneOptions::default(),
    )
    .unwrap();

    // The same LNB with a different polarisation must be refused.
    let err = subscribe_lnb_band_pol_sat(
        &txn,
        &mux(1920, 11_494_000, Polarisation::V),
        Some(&l1),
        None,
        &TuneOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Reserve(ReserveError::NoFrontendAvailable)
    ));

    let subs: Vec<FeSubscription> = db::list_frontends(&txn)
        .unwrap()
        .into_iter()
        .filter(|fe| fe.sub.use_count > 0)
        .map(|fe| fe.sub)
        .collect();
    assert_eq!(subs.len(), 1);
}

/// Invariant 7: an LNB on a fixed mount never reports a needed dish
/// move, whatever position is asked of it.
#[test]
fn fixed_mount_never_moves() {
    let fixed = lnb(0, 1, 1, 1920);
    for sat_pos in [1920, 1300, 2820, -300] {
        assert!(!fixed.dish_needs_to_be_moved(sat_pos));
    }
}
