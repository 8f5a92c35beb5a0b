//! The LNB arbitrator: pick the best LNB+frontend for a satellite mux
//! while checking cable, positioner and exclusivity conflicts.

use log::debug;
use rusqlite::Connection;
use serde::Serialize;

use dvbpool_types::{
    DelsysType, DvbsMux, FeBand, FeKey, Frontend, Lnb, LnbKey, Polarisation, TuneOptions,
    SAT_POS_NONE, SAT_POS_TOLERANCE,
};

use crate::db::{self, Result};
use crate::reserve::fe_select::fe_beats;
use crate::reserve::liveness::is_subscribed;

/// How many live subscriptions contend for each shared resource of an
/// LNB, as of the enclosing transaction, minus any frontend the caller
/// is about to release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionCounts {
    pub lnb: u32,
    pub tuner: u32,
    pub dish: u32,
    pub rf_coupler: u32,
}

impl SubscriptionCounts {
    pub fn any(&self) -> bool {
        self.lnb >= 1 || self.tuner >= 1 || self.dish >= 1 || self.rf_coupler >= 1
    }
}

/// Count the live subscriptions contending for `lnb_key`'s LNB, RF
/// input, dish and coupler group.
pub fn subscription_counts(
    conn: &Connection,
    lnb_key: &LnbKey,
    fe_to_release: Option<&FeKey>,
) -> Result<SubscriptionCounts> {
    let mut counts = SubscriptionCounts::default();
    let rf_coupler = db::rf_coupler_id(conn, lnb_key)?;

    for fe in db::list_frontends_on_card(conn, lnb_key.card_mac_address)? {
        if !is_subscribed(&fe) {
            continue;
        }
        if fe_to_release.map_or(false, |k| fe.k == *k) {
            continue;
        }
        if fe.sub.lnb_key == *lnb_key {
            counts.lnb += 1;
        }
        if fe.sub.lnb_key.rf_input == lnb_key.rf_input {
            counts.tuner += 1;
        }
        if rf_coupler >= 0 && db::rf_coupler_id(conn, &fe.sub.lnb_key)? == rf_coupler {
            counts.rf_coupler += 1;
        }
        if (lnb_key.dish_id >= 0 && fe.sub.lnb_key.dish_id == lnb_key.dish_id)
            || fe.sub.lnb_key == *lnb_key
        {
            counts.dish += 1;
        }
    }
    Ok(counts)
}

/// A held subscription on the same coupler group forces agreement on
/// (pol, band, usals_pos): a priority/T switch carries only one
/// band/pol/sat at a time.
fn shared_rf_input_conflict(
    conn: &Connection,
    fe: &Frontend,
    rf_coupler_id: i32,
    pol: Polarisation,
    band: FeBand,
    usals_pos: i16,
) -> Result<bool> {
    if db::rf_coupler_id(conn, &fe.sub.lnb_key)? != rf_coupler_id {
        return Ok(false);
    }
    if !fe.enable_dvbs || !fe.supports_delsys_type(DelsysType::DvbS) {
        // Not a satellite use of the cable.
        return Ok(false);
    }
    Ok(fe.sub.pol != pol || fe.sub.band != band || fe.sub.usals_pos != usals_pos)
}

/// A dish cannot be pointed to two places at once, and an exclusive
/// holder owns it outright.
fn shared_positioner_conflict(
    fe: &Frontend,
    dish_id: i32,
    usals_pos: i16,
    need_exclusivity: bool,
) -> bool {
    if dish_id < 0 {
        // The LNB is on a dish of its own.
        return false;
    }
    if fe.sub.lnb_key.dish_id < 0 || fe.sub.lnb_key.dish_id != dish_id {
        return false;
    }
    need_exclusivity
        || fe.sub.usals_pos == SAT_POS_NONE
        || (usals_pos as i32 - fe.sub.usals_pos as i32).abs() >= SAT_POS_TOLERANCE as i32
}

/// Select the best frontend able to drive `lnb` under conflict
/// analysis.
///
/// Exclusivity is requested by passing the sentinel for any of `pol`,
/// `band`, `usals_pos`. Frontends on the LNB's card are examined; a
/// conflicting held subscription anywhere on the card (same LNB with
/// other parameters, same RF input with another LNB, shared cable,
/// shared positioner) makes the LNB unusable and the whole search
/// returns none.
#[allow(clippy::too_many_arguments)]
pub fn find_best_fe_for_lnb(
    conn: &Connection,
    lnb: &Lnb,
    fe_to_release: Option<&FeKey>,
    need_blindscan: bool,
    need_spectrum: bool,
    need_multistream: bool,
    pol: Polarisation,
    band: FeBand,
    usals_pos: i16,
) -> Result<Option<Frontend>> {
    let rf_coupler_id = db::rf_coupler_id(conn, &lnb.k)?;
    let lnb_on_positioner = lnb.on_positioner();
    let need_exclusivity =
        pol == Polarisation::None || band == FeBand::None || usals_pos == SAT_POS_NONE;

    let fes = db::list_frontends_on_card(conn, lnb.k.card_mac_address)?;

    // One adapter can carry several frontends sharing a demod; all of
    // them must be checked.
    let adapter_in_use = |adapter_no: i32| {
        fes.iter()
            .any(|fe| fe.present && fe.adapter_no == adapter_no && is_subscribed(fe))
    };

    let mut best: Option<Frontend> = None;
    for fe in &fes {
        let subscribed = is_subscribed(fe);
        let is_our_subscription = fe_to_release.map_or(false, |k| fe.k == *k);
        if !subscribed || is_our_subscription {
            if !fe.present || !fe.supports_delsys_type(DelsysType::DvbS) {
                // Not there, or cannot do DVB-S; it also cannot
                // conflict with other frontends.
                continue;
            }
            if !fe.enable_dvbs {
                // Disabled by the user; every process sees the same
                // flag, so no conflicts either.
                continue;
            }
            if !fe.rf_inputs.contains(&lnb.k.rf_input)
                || (need_blindscan && !fe.supports.blindscan)
                || (need_multistream && !fe.supports.multistream)
            {
                continue;
            }
            if !is_our_subscription && adapter_in_use(fe.adapter_no) {
                continue;
            }
            if fe_beats(best.as_ref(), fe, need_spectrum, is_our_subscription) {
                best = Some(fe.clone());
            }
            continue;
        }

        // This frontend carries another live subscription; its
        // resources may conflict with the LNB we want.
        if fe.sub.lnb_key == lnb.k {
            // Case 1: it holds our LNB.
            if need_exclusivity {
                return Ok(None);
            }
            if fe.sub.pol != pol || fe.sub.band != band || fe.sub.usals_pos != usals_pos {
                // Parameters differ, or the holder is exclusive (its
                // sentinel values fail the comparison).
                return Ok(None);
            }
        } else if fe.sub.lnb_key.rf_input == lnb.k.rf_input {
            // Case 2: the RF input is busy with another LNB.
            return Ok(None);
        } else {
            // Case 3: neither our LNB nor our RF input, but the cable
            // or the dish may still be shared.
            if rf_coupler_id >= 0
                && shared_rf_input_conflict(conn, fe, rf_coupler_id, pol, band, usals_pos)?
            {
                return Ok(None);
            }
            if lnb_on_positioner
                && shared_positioner_conflict(fe, lnb.k.dish_id, usals_pos, need_exclusivity)
            {
                return Ok(None);
            }
        }
    }
    Ok(best)
}

/// The outcome of the LNB arbitration: the chosen pair, the target
/// dish position, and the contention counts before our reservation.
#[derive(Debug, Clone)]
pub struct LnbSelection {
    pub fe: Frontend,
    pub lnb: Lnb,
    pub usals_pos: i16,
    pub counts: SubscriptionCounts,
}

/// Pick the best LNB+frontend for tuning `mux`.
///
/// Every enabled LNB (or just `required_lnb`) is scored on its network
/// priority, penalised when the dish would have to move, and its
/// frontends are filtered through the conflict analysis. A
/// resource-reuse bonus nudges the choice toward hardware the caller's
/// other subscriptions already hold.
pub fn find_fe_and_lnb_for_mux(
    conn: &Connection,
    mux: &DvbsMux,
    required_lnb: Option<&Lnb>,
    fe_to_release: Option<&FeKey>,
    options: &TuneOptions,
) -> Result<Option<LnbSelection>> {
    let mut best: Option<LnbSelection> = None;
    let mut best_lnb_prio = i32::MIN;
    let mut best_fe_prio = i32::MIN;

    // required_lnb may carry edited networks not yet saved, so it is
    // used as given instead of being re-read from the store.
    let candidates: Vec<Lnb> = match required_lnb {
        Some(lnb) => vec![lnb.clone()],
        None => db::list_lnbs(conn)?,
    };

    for lnb in &candidates {
        if !lnb.enabled || !lnb.can_be_used {
            continue;
        }
        let Some(hit) = lnb.has_network(mux.k.sat_pos) else {
            continue;
        };
        let dish_needs_to_be_moved = hit.usals_move_amount != 0;
        let lnb_can_control_rotor = lnb.can_move_dish();
        let lnb_is_on_rotor = lnb.on_positioner();

        if lnb_is_on_rotor
            && hit.usals_move_amount >= SAT_POS_TOLERANCE as i32
            && (!options.may_move_dish || !lnb_can_control_rotor)
        {
            // The dish would have to move but may not, or cannot.
            continue;
        }

        let lnb_priority = if hit.priority >= 0 {
            hit.priority
        } else {
            lnb.priority
        };
        let penalty = if dish_needs_to_be_moved {
            options.dish_move_penalty
        } else {
            0
        };
        if lnb_priority >= 0 && lnb_priority - penalty < best_lnb_prio {
            continue;
        }

        if !lnb.can_tune_to_mux(mux, false) {
            continue;
        }

        let need_blindscan = options.need_blind_tune;
        let need_spectrum = false;
        let need_multistream = mux.stream_id >= 0;
        let pol = mux.pol;
        let band = lnb.band_for_mux(mux);

        let Some(fe) = find_best_fe_for_lnb(
            conn,
            lnb,
            fe_to_release,
            need_blindscan,
            need_spectrum,
            need_multistream,
            pol,
            band,
            hit.usals_pos,
        )?
        else {
            debug!("lnb {:?} cannot be used for mux {:?}", lnb.k, mux.k);
            continue;
        };

        let counts = subscription_counts(conn, &lnb.k, fe_to_release)?;
        let mut fe_prio = fe.priority;
        if counts.any() {
            fe_prio += options.resource_reuse_bonus;
        }

        if (lnb_priority < 0 || lnb_priority - penalty == best_lnb_prio)
            && fe_prio - penalty <= best_fe_prio
        {
            // Tied on LNB priority and not better on the frontend.
            continue;
        }

        best_fe_prio = fe_prio - penalty;
        best_lnb_prio = (if lnb_priority < 0 { fe_prio } else { lnb_priority }) - penalty;
        best = Some(LnbSelection {
            fe,
            lnb: lnb.clone(),
            usals_pos: hit.usals_pos,
            counts,
        });
        if required_lnb.is_some() {
            break;
        }
    }
    Ok(best)
}
