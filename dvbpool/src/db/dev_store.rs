//! Typed access to the device tables: frontends, LNBs, RF couplers
//! and live signal statistics.

use log::debug;
use rusqlite::{params, Connection, Row};

use dvbpool_types::lnb::usals_is_close;
use dvbpool_types::{
    DeliverySystem, FeBand, FeKey, FeSubscription, FeSupports, Frontend, Lnb, LnbKey, LnbNetwork,
    LnbPolType, LnbType, Polarisation, RotorControl,
};

use super::Result;

fn bad_value(idx: usize, value: i64, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Integer,
        format!("invalid {} value {}", what, value).into(),
    )
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const FE_COLUMNS: &str = "adapter_mac_address, frontend_no, card_mac_address, adapter_no, \
     card_no, adapter_name, card_short_name, present, can_be_used, \
     enable_dvbs, enable_dvbc, enable_dvbt, priority, delivery_systems, rf_inputs, \
     blindscan, multistream, spectrum_fft, spectrum_sweep, \
     sub_owner, sub_use_count, sub_lnb_card_mac, sub_lnb_rf_input, sub_lnb_dish_id, \
     sub_lnb_id, sub_pol, sub_band, sub_usals_pos, sub_frequency, sub_stream_id";

fn frontend_from_row(row: &Row) -> rusqlite::Result<Frontend> {
    let delsys: Vec<u8> = json_column(row, 13)?;
    let delivery_systems = delsys
        .iter()
        .map(|&v| DeliverySystem::from_repr(v).ok_or_else(|| bad_value(13, v as i64, "delsys")))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let sub_pol: u8 = row.get(25)?;
    let sub_band: u8 = row.get(26)?;
    Ok(Frontend {
        k: FeKey {
            adapter_mac_address: row.get(0)?,
            frontend_no: row.get(1)?,
        },
        card_mac_address: row.get(2)?,
        adapter_no: row.get(3)?,
        card_no: row.get(4)?,
        adapter_name: row.get(5)?,
        card_short_name: row.get(6)?,
        present: row.get::<_, i64>(7)? != 0,
        can_be_used: row.get::<_, i64>(8)? != 0,
        enable_dvbs: row.get::<_, i64>(9)? != 0,
        enable_dvbc: row.get::<_, i64>(10)? != 0,
        enable_dvbt: row.get::<_, i64>(11)? != 0,
        priority: row.get(12)?,
        delivery_systems,
        rf_inputs: json_column(row, 14)?,
        supports: FeSupports {
            blindscan: row.get::<_, i64>(15)? != 0,
            multistream: row.get::<_, i64>(16)? != 0,
            spectrum_fft: row.get::<_, i64>(17)? != 0,
            spectrum_sweep: row.get::<_, i64>(18)? != 0,
        },
        sub: FeSubscription {
            owner: row.get(19)?,
            use_count: row.get(20)?,
            lnb_key: LnbKey {
                card_mac_address: row.get(21)?,
                rf_input: row.get(22)?,
                dish_id: row.get(23)?,
                lnb_id: row.get(24)?,
            },
            pol: Polarisation::from_repr(sub_pol)
                .ok_or_else(|| bad_value(25, sub_pol as i64, "sub_pol"))?,
            band: FeBand::from_repr(sub_band)
                .ok_or_else(|| bad_value(26, sub_band as i64, "sub_band"))?,
            usals_pos: row.get(27)?,
            frequency: row.get(28)?,
            stream_id: row.get(29)?,
        },
    })
}

pub fn put_frontend(conn: &Connection, fe: &Frontend) -> Result<()> {
    let delsys: Vec<u8> = fe.delivery_systems.iter().map(|&d| d as u8).collect();
    conn.execute(
        "INSERT OR REPLACE INTO frontends (adapter_mac_address, frontend_no, card_mac_address,
            adapter_no, card_no, adapter_name, card_short_name, present, can_be_used,
            enable_dvbs, enable_dvbc, enable_dvbt, priority, delivery_systems, rf_inputs,
            blindscan, multistream, spectrum_fft, spectrum_sweep,
            sub_owner, sub_use_count, sub_lnb_card_mac, sub_lnb_rf_input, sub_lnb_dish_id,
            sub_lnb_id, sub_pol, sub_band, sub_usals_pos, sub_frequency, sub_stream_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
        params![
            fe.k.adapter_mac_address,
            fe.k.frontend_no,
            fe.card_mac_address,
            fe.adapter_no,
            fe.card_no,
            fe.adapter_name,
            fe.card_short_name,
            fe.present as i64,
            fe.can_be_used as i64,
            fe.enable_dvbs as i64,
            fe.enable_dvbc as i64,
            fe.enable_dvbt as i64,
            fe.priority,
            serde_json::to_string(&delsys).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&fe.rf_inputs).unwrap_or_else(|_| "[]".into()),
            fe.supports.blindscan as i64,
            fe.supports.multistream as i64,
            fe.supports.spectrum_fft as i64,
            fe.supports.spectrum_sweep as i64,
            fe.sub.owner,
            fe.sub.use_count,
            fe.sub.lnb_key.card_mac_address,
            fe.sub.lnb_key.rf_input,
            fe.sub.lnb_key.dish_id,
            fe.sub.lnb_key.lnb_id,
            fe.sub.pol as u8,
            fe.sub.band as u8,
            fe.sub.usals_pos,
            fe.sub.frequency,
            fe.sub.stream_id,
        ],
    )?;
    Ok(())
}

pub fn get_frontend(conn: &Connection, key: &FeKey) -> Result<Option<Frontend>> {
    let sql = format!(
        "SELECT {} FROM frontends WHERE adapter_mac_address = ?1 AND frontend_no = ?2",
        FE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(
        params![key.adapter_mac_address, key.frontend_no],
        frontend_from_row,
    )?;
    Ok(rows.next().transpose()?)
}

pub fn list_frontends(conn: &Connection) -> Result<Vec<Frontend>> {
    let sql = format!(
        "SELECT {} FROM frontends ORDER BY adapter_mac_address, frontend_no",
        FE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], frontend_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// All frontends on one card; the card is the conflict domain of the
/// LNB arbitrator.
pub fn list_frontends_on_card(conn: &Connection, card_mac_address: i64) -> Result<Vec<Frontend>> {
    let sql = format!(
        "SELECT {} FROM frontends WHERE card_mac_address = ?1
         ORDER BY adapter_mac_address, frontend_no",
        FE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![card_mac_address], frontend_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn lnb_from_row(row: &Row) -> rusqlite::Result<Lnb> {
    let lnb_type: u8 = row.get(4)?;
    let rotor_control: u8 = row.get(5)?;
    let pol_type: u8 = row.get(6)?;
    Ok(Lnb {
        k: LnbKey {
            card_mac_address: row.get(0)?,
            rf_input: row.get(1)?,
            dish_id: row.get(2)?,
            lnb_id: row.get(3)?,
        },
        lnb_type: LnbType::from_repr(lnb_type)
            .ok_or_else(|| bad_value(4, lnb_type as i64, "lnb_type"))?,
        rotor_control: RotorControl::from_repr(rotor_control)
            .ok_or_else(|| bad_value(5, rotor_control as i64, "rotor_control"))?,
        pol_type: LnbPolType::from_repr(pol_type)
            .ok_or_else(|| bad_value(6, pol_type as i64, "pol_type"))?,
        lof_low: row.get(7)?,
        lof_high: row.get(8)?,
        freq_low: row.get(9)?,
        freq_mid: row.get(10)?,
        freq_high: row.get(11)?,
        priority: row.get(12)?,
        enabled: row.get::<_, i64>(13)? != 0,
        can_be_used: row.get::<_, i64>(14)? != 0,
        usals_pos: row.get(15)?,
        adapter_name: row.get(16)?,
        networks: Vec::new(),
    })
}

fn load_networks(conn: &Connection, key: &LnbKey) -> Result<Vec<LnbNetwork>> {
    let mut stmt = conn.prepare(
        "SELECT sat_pos, priority, usals_pos FROM lnb_networks
         WHERE card_mac_address = ?1 AND rf_input = ?2 AND dish_id = ?3 AND lnb_id = ?4
         ORDER BY sat_pos",
    )?;
    let rows = stmt.query_map(
        params![key.card_mac_address, key.rf_input, key.dish_id, key.lnb_id],
        |row| {
            Ok(LnbNetwork {
                sat_pos: row.get(0)?,
                priority: row.get(1)?,
                usals_pos: row.get(2)?,
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn put_lnb(conn: &Connection, lnb: &Lnb) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO lnbs (card_mac_address, rf_input, dish_id, lnb_id,
            lnb_type, rotor_control, pol_type, lof_low, lof_high,
            freq_low, freq_mid, freq_high, priority, enabled, can_be_used,
            usals_pos, adapter_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            lnb.k.card_mac_address,
            lnb.k.rf_input,
            lnb.k.dish_id,
            lnb.k.lnb_id,
            lnb.lnb_type as u8,
            lnb.rotor_control as u8,
            lnb.pol_type as u8,
            lnb.lof_low,
            lnb.lof_high,
            lnb.freq_low,
            lnb.freq_mid,
            lnb.freq_high,
            lnb.priority,
            lnb.enabled as i64,
            lnb.can_be_used as i64,
            lnb.usals_pos,
            lnb.adapter_name,
        ],
    )?;
    conn.execute(
        "DELETE FROM lnb_networks WHERE card_mac_address = ?1 AND rf_input = ?2
         AND dish_id = ?3 AND lnb_id = ?4",
        params![
            lnb.k.card_mac_address,
            lnb.k.rf_input,
            lnb.k.dish_id,
            lnb.k.lnb_id
        ],
    )?;
    for network in &lnb.networks {
        conn.execute(
            "INSERT INTO lnb_networks (card_mac_address, rf_input, dish_id, lnb_id,
                sat_pos, priority, usals_pos)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                lnb.k.card_mac_address,
                lnb.k.rf_input,
                lnb.k.dish_id,
                lnb.k.lnb_id,
                network.sat_pos,
                network.priority,
                network.usals_pos,
            ],
        )?;
    }
    Ok(())
}

pub fn get_lnb(conn: &Connection, key: &LnbKey) -> Result<Option<Lnb>> {
    let mut stmt = conn.prepare(
        "SELECT card_mac_address, rf_input, dish_id, lnb_id, lnb_type, rotor_control,
            pol_type, lof_low, lof_high, freq_low, freq_mid, freq_high, priority,
            enabled, can_be_used, usals_pos, adapter_name
         FROM lnbs WHERE card_mac_address = ?1 AND rf_input = ?2 AND dish_id = ?3
            AND lnb_id = ?4",
    )?;
    let mut rows = stmt.query_map(
        params![key.card_mac_address, key.rf_input, key.dish_id, key.lnb_id],
        lnb_from_row,
    )?;
    match rows.next().transpose()? {
        Some(mut lnb) => {
            lnb.networks = load_networks(conn, key)?;
            Ok(Some(lnb))
        }
        None => Ok(None),
    }
}

pub fn list_lnbs(conn: &Connection) -> Result<Vec<Lnb>> {
    let mut stmt = conn.prepare(
        "SELECT card_mac_address, rf_input, dish_id, lnb_id, lnb_type, rotor_control,
            pol_type, lof_low, lof_high, freq_low, freq_mid, freq_high, priority,
            enabled, can_be_used, usals_pos, adapter_name
         FROM lnbs ORDER BY card_mac_address, rf_input, dish_id, lnb_id",
    )?;
    let rows = stmt.query_map([], lnb_from_row)?;
    let mut lnbs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    for lnb in &mut lnbs {
        lnb.networks = load_networks(conn, &lnb.k)?;
    }
    Ok(lnbs)
}

/// Declare that an RF input is wired to a shared cable.
pub fn set_rf_coupler(
    conn: &Connection,
    card_mac_address: i64,
    rf_input: u8,
    coupler_id: i32,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO rf_couplers (card_mac_address, rf_input, coupler_id)
         VALUES (?1, ?2, ?3)",
        params![card_mac_address, rf_input, coupler_id],
    )?;
    Ok(())
}

/// The coupler group of an LNB's RF input, or -1 when the input is not
/// on a shared cable.
pub fn rf_coupler_id(conn: &Connection, lnb_key: &LnbKey) -> Result<i32> {
    let id = conn
        .query_row(
            "SELECT coupler_id FROM rf_couplers WHERE card_mac_address = ?1 AND rf_input = ?2",
            params![lnb_key.card_mac_address, lnb_key.rf_input],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(id.unwrap_or(-1))
}

/// Mirror a dish move into every LNB on the dish. Returns the number
/// of LNBs updated.
pub fn update_dish_usals_pos(conn: &Connection, dish_id: i32, usals_pos: i16) -> Result<usize> {
    if dish_id < 0 {
        return Ok(0);
    }
    let n = conn.execute(
        "UPDATE lnbs SET usals_pos = ?2 WHERE dish_id = ?1",
        params![dish_id, usals_pos],
    )?;
    debug!("dish {} moved to {}: {} lnbs updated", dish_id, usals_pos, n);
    Ok(n)
}

/// Whether pointing `dish_id` at `sat_pos` requires an actual move.
pub fn dish_needs_to_be_moved(conn: &Connection, dish_id: i32, sat_pos: i16) -> Result<bool> {
    if dish_id < 0 {
        return Ok(false);
    }
    let current: Option<i16> = conn
        .query_row(
            "SELECT usals_pos FROM lnbs WHERE dish_id = ?1 LIMIT 1",
            params![dish_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    match current {
        Some(pos) => Ok(!usals_is_close(pos, sat_pos)),
        None => Ok(false),
    }
}

pub fn put_signal_stat(
    conn: &Connection,
    fe_key: &FeKey,
    live: bool,
    snr: f64,
    strength: f64,
    updated_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO signal_stats
            (adapter_mac_address, frontend_no, live, snr, strength, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            fe_key.adapter_mac_address,
            fe_key.frontend_no,
            live as i64,
            snr,
            strength,
            updated_at
        ],
    )?;
    Ok(())
}

/// Clear live-signal rows left behind by a crashed process. Run at
/// startup before the device monitor begins.
pub fn clean_live_stats(conn: &Connection) -> Result<usize> {
    let n = conn.execute("UPDATE signal_stats SET live = 0 WHERE live != 0", [])?;
    if n > 0 {
        debug!("cleared {} stale live signal rows", n);
    }
    Ok(n)
}
