//! Typed access to the mux, sat and service tables.

use rusqlite::{params, Connection, Row};

use dvbpool_types::{
    DvbcMux, DvbsMux, DvbtMux, Modulation, MuxCommon, MuxKey, MuxVariant, Polarisation,
    ScanResult, ScanStatus, TuneSrc,
};

use super::Result;

fn bad_value(idx: usize, value: i64, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Integer,
        format!("invalid {} value {}", what, value).into(),
    )
}

fn key_from_row(row: &Row) -> rusqlite::Result<MuxKey> {
    Ok(MuxKey {
        sat_pos: row.get(0)?,
        network_id: row.get(1)?,
        ts_id: row.get(2)?,
        t2mi_pid: row.get(3)?,
        extra_id: row.get(4)?,
    })
}

/// Common block columns start at `base` in every mux table.
fn common_from_row(row: &Row, base: usize) -> rusqlite::Result<MuxCommon> {
    let scan_status: u8 = row.get(base)?;
    let scan_result: u8 = row.get(base + 2)?;
    let epg_types: String = row.get(base + 7)?;
    let tune_src: u8 = row.get(base + 8)?;
    Ok(MuxCommon {
        scan_status: ScanStatus::from_repr(scan_status)
            .ok_or_else(|| bad_value(base, scan_status as i64, "scan_status"))?,
        scan_id: row.get(base + 1)?,
        scan_result: ScanResult::from_repr(scan_result)
            .ok_or_else(|| bad_value(base + 2, scan_result as i64, "scan_result"))?,
        scan_duration: row.get(base + 3)?,
        scan_time: row.get(base + 4)?,
        epg_scan: row.get::<_, i64>(base + 5)? != 0,
        num_services: row.get(base + 6)?,
        epg_types: serde_json::from_str(&epg_types).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                base + 7,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        tune_src: TuneSrc::from_repr(tune_src)
            .ok_or_else(|| bad_value(base + 8, tune_src as i64, "tune_src"))?,
        mtime: row.get(base + 9)?,
    })
}

/// Storage binding for one mux kind: table name, column list and row
/// mapping. Extends the pure [`MuxVariant`] dispatch with what the
/// store needs.
pub trait MuxRow: MuxVariant {
    const TABLE: &'static str;
    /// Full column list, key columns first, common block last.
    const COLUMNS: &'static str;

    fn from_row(row: &Row) -> rusqlite::Result<Self>;
    fn put(conn: &Connection, mux: &Self) -> Result<()>;
}

impl MuxRow for DvbsMux {
    const TABLE: &'static str = "dvbs_muxes";
    const COLUMNS: &'static str = "sat_pos, network_id, ts_id, t2mi_pid, extra_id, \
         frequency, pol, symbol_rate, stream_id, modulation, \
         scan_status, scan_id, scan_result, scan_duration, scan_time, \
         epg_scan, num_services, epg_types, tune_src, mtime";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let pol: u8 = row.get(6)?;
        let modulation: u8 = row.get(9)?;
        Ok(Self {
            k: key_from_row(row)?,
            frequency: row.get(5)?,
            pol: Polarisation::from_repr(pol).ok_or_else(|| bad_value(6, pol as i64, "pol"))?,
            symbol_rate: row.get(7)?,
            stream_id: row.get(8)?,
            modulation: Modulation::from_repr(modulation)
                .ok_or_else(|| bad_value(9, modulation as i64, "modulation"))?,
            c: common_from_row(row, 10)?,
        })
    }

    fn put(conn: &Connection, mux: &Self) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO dvbs_muxes (sat_pos, network_id, ts_id, t2mi_pid, extra_id,
                frequency, pol, symbol_rate, stream_id, modulation,
                scan_status, scan_id, scan_result, scan_duration, scan_time,
                epg_scan, num_services, epg_types, tune_src, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                mux.k.sat_pos,
                mux.k.network_id,
                mux.k.ts_id,
                mux.k.t2mi_pid,
                mux.k.extra_id,
                mux.frequency,
                mux.pol as u8,
                mux.symbol_rate,
                mux.stream_id,
                mux.modulation as u8,
                mux.c.scan_status as u8,
                mux.c.scan_id,
                mux.c.scan_result as u8,
                mux.c.scan_duration,
                mux.c.scan_time,
                mux.c.epg_scan as i64,
                mux.c.num_services,
                serde_json::to_string(&mux.c.epg_types).unwrap_or_else(|_| "[]".into()),
                mux.c.tune_src as u8,
                mux.c.mtime,
            ],
        )?;
        Ok(())
    }
}

impl MuxRow for DvbcMux {
    const TABLE: &'static str = "dvbc_muxes";
    const COLUMNS: &'static str = "sat_pos, network_id, ts_id, t2mi_pid, extra_id, \
         frequency, symbol_rate, stream_id, modulation, \
         scan_status, scan_id, scan_result, scan_duration, scan_time, \
         epg_scan, num_services, epg_types, tune_src, mtime";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let modulation: u8 = row.get(8)?;
        Ok(Self {
            k: key_from_row(row)?,
            frequency: row.get(5)?,
            symbol_rate: row.get(6)?,
            stream_id: row.get(7)?,
            modulation: Modulation::from_repr(modulation)
                .ok_or_else(|| bad_value(8, modulation as i64, "modulation"))?,
            c: common_from_row(row, 9)?,
        })
    }

    fn put(conn: &Connection, mux: &Self) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO dvbc_muxes (sat_pos, network_id, ts_id, t2mi_pid, extra_id,
                frequency, symbol_rate, stream_id, modulation,
                scan_status, scan_id, scan_result, scan_duration, scan_time,
                epg_scan, num_services, epg_types, tune_src, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                     ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                mux.k.sat_pos,
                mux.k.network_id,
                mux.k.ts_id,
                mux.k.t2mi_pid,
                mux.k.extra_id,
                mux.frequency,
                mux.symbol_rate,
                mux.stream_id,
                mux.modulation as u8,
                mux.c.scan_status as u8,
                mux.c.scan_id,
                mux.c.scan_result as u8,
                mux.c.scan_duration,
                mux.c.scan_time,
                mux.c.epg_scan as i64,
                mux.c.num_services,
                serde_json::to_string(&mux.c.epg_types).unwrap_or_else(|_| "[]".into()),
                mux.c.tune_src as u8,
                mux.c.mtime,
            ],
        )?;
        Ok(())
    }
}

impl MuxRow for DvbtMux {
    const TABLE: &'static str = "dvbt_muxes";
    const COLUMNS: &'static str = "sat_pos, network_id, ts_id, t2mi_pid, extra_id, \
         frequency, bandwidth, stream_id, modulation, \
         scan_status, scan_id, scan_result, scan_duration, scan_time, \
         epg_scan, num_services, epg_types, tune_src, mtime";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let modulation: u8 = row.get(8)?;
        Ok(Self {
            k: key_from_row(row)?,
            frequency: row.get(5)?,
            bandwidth: row.get(6)?,
            stream_id: row.get(7)?,
            modulation: Modulation::from_repr(modulation)
                .ok_or_else(|| bad_value(8, modulation as i64, "modulation"))?,
            c: common_from_row(row, 9)?,
        })
    }

    fn put(conn: &Connection, mux: &Self) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO dvbt_muxes (sat_pos, network_id, ts_id, t2mi_pid, extra_id,
                frequency, bandwidth, stream_id, modulation,
                scan_status, scan_id, scan_result, scan_duration, scan_time,
                epg_scan, num_services, epg_types, tune_src, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                     ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                mux.k.sat_pos,
                mux.k.network_id,
                mux.k.ts_id,
                mux.k.t2mi_pid,
                mux.k.extra_id,
                mux.frequency,
                mux.bandwidth,
                mux.stream_id,
                mux.modulation as u8,
                mux.c.scan_status as u8,
                mux.c.scan_id,
                mux.c.scan_result as u8,
                mux.c.scan_duration,
                mux.c.scan_time,
                mux.c.epg_scan as i64,
                mux.c.num_services,
                serde_json::to_string(&mux.c.epg_types).unwrap_or_else(|_| "[]".into()),
                mux.c.tune_src as u8,
                mux.c.mtime,
            ],
        )?;
        Ok(())
    }
}

/// Exact lookup on the full composite key.
pub fn get_mux_by_key<T: MuxRow>(conn: &Connection, key: &MuxKey) -> Result<Option<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE sat_pos = ?1 AND network_id = ?2 AND ts_id = ?3
         AND t2mi_pid = ?4 AND extra_id = ?5",
        T::COLUMNS,
        T::TABLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(
        params![
            key.sat_pos,
            key.network_id,
            key.ts_id,
            key.t2mi_pid,
            key.extra_id
        ],
        T::from_row,
    )?;
    Ok(rows.next().transpose()?)
}

/// All muxes sharing the `(sat_pos, network_id, ts_id, t2mi_pid)`
/// prefix, ordered by `extra_id`.
pub fn list_muxes_by_partial_key<T: MuxRow>(conn: &Connection, key: &MuxKey) -> Result<Vec<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE sat_pos = ?1 AND network_id = ?2 AND ts_id = ?3
         AND t2mi_pid = ?4 ORDER BY extra_id",
        T::COLUMNS,
        T::TABLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![key.sat_pos, key.network_id, key.ts_id, key.t2mi_pid],
        T::from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// All muxes with the given SI identifiers, on any satellite.
pub fn list_muxes_by_nid_tid<T: MuxRow>(
    conn: &Connection,
    network_id: u16,
    ts_id: u16,
) -> Result<Vec<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE network_id = ?1 AND ts_id = ?2
         ORDER BY sat_pos, t2mi_pid, extra_id",
        T::COLUMNS,
        T::TABLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![network_id, ts_id], T::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn delete_mux_by_key<T: MuxRow>(conn: &Connection, key: &MuxKey) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE sat_pos = ?1 AND network_id = ?2 AND ts_id = ?3
         AND t2mi_pid = ?4 AND extra_id = ?5",
        T::TABLE
    );
    let n = conn.execute(
        &sql,
        params![
            key.sat_pos,
            key.network_id,
            key.ts_id,
            key.t2mi_pid,
            key.extra_id
        ],
    )?;
    Ok(n > 0)
}

/// Assign an `extra_id` that is unused among muxes sharing the
/// 4-component key prefix.
pub fn make_unique_extra_id<T: MuxRow>(conn: &Connection, key: &MuxKey) -> Result<u16> {
    let sql = format!(
        "SELECT COALESCE(MAX(extra_id), 0) FROM {} WHERE sat_pos = ?1 AND network_id = ?2
         AND ts_id = ?3 AND t2mi_pid = ?4",
        T::TABLE
    );
    let max: u16 = conn.query_row(
        &sql,
        params![key.sat_pos, key.network_id, key.ts_id, key.t2mi_pid],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

/// The `(sat_pos, pol)` index prefix ordered by frequency, for the
/// bidirectional fuzzy walk.
pub fn sat_pol_rows(conn: &Connection, sat_pos: i16, pol: Polarisation) -> Result<Vec<DvbsMux>> {
    let sql = format!(
        "SELECT {} FROM dvbs_muxes WHERE sat_pos = ?1 AND pol = ?2
         ORDER BY frequency, stream_id, t2mi_pid, extra_id",
        DvbsMux::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![sat_pos, pol as u8], DvbsMux::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// The whole frequency axis of a cable/terrestrial table, ordered.
pub fn freq_ordered_muxes<T: MuxRow>(conn: &Connection) -> Result<Vec<T>> {
    let sql = format!(
        "SELECT {} FROM {} ORDER BY frequency, stream_id, extra_id",
        T::COLUMNS,
        T::TABLE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], T::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// A known satellite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sat {
    pub sat_pos: i16,
    pub name: String,
}

pub fn put_sat(conn: &Connection, sat: &Sat) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sats (sat_pos, name) VALUES (?1, ?2)",
        params![sat.sat_pos, sat.name],
    )?;
    Ok(())
}

/// Satellites within `tolerance` of `sat_pos`, ordered by position.
pub fn sats_near(conn: &Connection, sat_pos: i16, tolerance: i16) -> Result<Vec<Sat>> {
    let mut stmt = conn.prepare(
        "SELECT sat_pos, name FROM sats WHERE sat_pos >= ?1 AND sat_pos <= ?2 ORDER BY sat_pos",
    )?;
    let rows = stmt.query_map(
        params![
            sat_pos as i32 - tolerance as i32,
            sat_pos as i32 + tolerance as i32
        ],
        |row| {
            Ok(Sat {
                sat_pos: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn put_service(
    conn: &Connection,
    mux_key: &MuxKey,
    service_id: u16,
    name: &str,
    mtime: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO services
            (sat_pos, network_id, ts_id, t2mi_pid, extra_id, service_id, name, mtime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            mux_key.sat_pos,
            mux_key.network_id,
            mux_key.ts_id,
            mux_key.t2mi_pid,
            mux_key.extra_id,
            service_id,
            name,
            mtime
        ],
    )?;
    Ok(())
}

pub fn count_services_on_mux(conn: &Connection, mux_key: &MuxKey) -> Result<u32> {
    let n: u32 = conn.query_row(
        "SELECT COUNT(*) FROM services WHERE sat_pos = ?1 AND network_id = ?2
         AND ts_id = ?3 AND t2mi_pid = ?4 AND extra_id = ?5",
        params![
            mux_key.sat_pos,
            mux_key.network_id,
            mux_key.ts_id,
            mux_key.t2mi_pid,
            mux_key.extra_id
        ],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Rewrite service rows referencing `old` so they reference `new`;
/// called when a mux's key changes.
pub fn move_services_to_key(conn: &Connection, old: &MuxKey, new: &MuxKey) -> Result<usize> {
    let n = conn.execute(
        "UPDATE services SET sat_pos = ?6, network_id = ?7, ts_id = ?8,
             t2mi_pid = ?9, extra_id = ?10, mtime = ?11
         WHERE sat_pos = ?1 AND network_id = ?2 AND ts_id = ?3
             AND t2mi_pid = ?4 AND extra_id = ?5",
        params![
            old.sat_pos,
            old.network_id,
            old.ts_id,
            old.t2mi_pid,
            old.extra_id,
            new.sat_pos,
            new.network_id,
            new.ts_id,
            new.t2mi_pid,
            new.extra_id,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn sample_mux(frequency: u32, extra_id: u16) -> DvbsMux {
        DvbsMux {
            k: MuxKey {
                sat_pos: 1920,
                network_id: 2,
                ts_id: 2004,
                t2mi_pid: 0,
                extra_id,
            },
            frequency,
            pol: Polarisation::H,
            symbol_rate: 27_500_000,
            stream_id: -1,
            ..DvbsMux::default()
        }
    }

    #[test]
    fn mux_roundtrip_preserves_all_fields() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let mut mux = sample_mux(11_494_000, 1);
        mux.c.scan_status = ScanStatus::Pending;
        mux.c.scan_id = 42;
        mux.c.epg_types = vec![0, 3];
        mux.c.tune_src = TuneSrc::NitActualTuned;
        mux.c.mtime = 1000;
        DvbsMux::put(conn, &mux).unwrap();

        let read: DvbsMux = get_mux_by_key(conn, &mux.k).unwrap().unwrap();
        assert_eq!(read, mux);
    }

    #[test]
    fn partial_key_scan_orders_by_extra_id() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        DvbsMux::put(conn, &sample_mux(11_494_000, 2)).unwrap();
        DvbsMux::put(conn, &sample_mux(11_494_000, 1)).unwrap();

        let rows: Vec<DvbsMux> =
            list_muxes_by_partial_key(conn, &sample_mux(0, 0).k).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].k.extra_id, 1);
        assert_eq!(rows[1].k.extra_id, 2);
    }

    #[test]
    fn unique_extra_id_skips_existing_ones() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let key = sample_mux(0, 0).k;
        assert_eq!(make_unique_extra_id::<DvbsMux>(conn, &key).unwrap(), 1);
        DvbsMux::put(conn, &sample_mux(11_494_000, 3)).unwrap();
        assert_eq!(make_unique_extra_id::<DvbsMux>(conn, &key).unwrap(), 4);
    }

    #[test]
    fn key_change_moves_services() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let old = sample_mux(11_494_000, 1).k;
        let mut new = old;
        new.network_id = 7;
        put_service(conn, &old, 501, "one", 0).unwrap();
        put_service(conn, &old, 502, "two", 0).unwrap();

        assert_eq!(move_services_to_key(conn, &old, &new).unwrap(), 2);
        assert_eq!(count_services_on_mux(conn, &old).unwrap(), 0);
        assert_eq!(count_services_on_mux(conn, &new).unwrap(), 2);
    }
}
