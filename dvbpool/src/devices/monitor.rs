//! Device hot-plug monitoring.
//!
//! A filesystem watcher on the adapter device tree (`adapterN/
//! frontendM` nodes) feeds add/remove events through a bounded queue
//! into a long-lived actor, which applies them to the store under a
//! write transaction: frontend upsert, dense card renumbering and LNB
//! adapter-field refresh. Hardware probing happens before the
//! transaction is taken; reservation code never talks to the watcher
//! directly.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use log::{info, warn};
use notify::{RecursiveMode, Watcher};
use rusqlite::Connection;
use tokio::sync::mpsc;

use dvbpool_types::{DeliverySystem, FeKey, FeSupports, Frontend};

use crate::db::{self, Database, Result};

/// Prefix marking an adapter whose hardware has disappeared.
const MISSING_ADAPTER_PREFIX: &str = "A-- ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    FrontendAdded { adapter_no: u32, frontend_no: u8 },
    FrontendRemoved { adapter_no: u32, frontend_no: u8 },
}

/// Hardware identity and capabilities of a discovered frontend,
/// supplied by the platform probe.
#[derive(Debug, Clone)]
pub struct FrontendInfo {
    pub adapter_mac_address: i64,
    pub card_mac_address: i64,
    pub adapter_name: String,
    pub card_short_name: String,
    pub delivery_systems: Vec<DeliverySystem>,
    pub rf_inputs: Vec<u8>,
    pub supports: FeSupports,
}

/// Queries the hardware for a frontend's identity. Kept behind a trait
/// so the store updates stay free of device I/O.
pub trait ProbeFrontend: Send {
    fn probe(&self, adapter_no: u32, frontend_no: u8) -> Option<FrontendInfo>;
}

/// Parse `adapterN/frontendM` relative to the device tree root.
pub fn parse_device_path(root: &Path, path: &Path) -> Option<(u32, u8)> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = rel.components();
    let adapter = parts.next()?.as_os_str().to_str()?;
    let frontend = parts.next()?.as_os_str().to_str()?;
    if parts.next().is_some() {
        return None;
    }
    let adapter_no = adapter.strip_prefix("adapter")?.parse().ok()?;
    let frontend_no = frontend.strip_prefix("frontend")?.parse().ok()?;
    Some((adapter_no, frontend_no))
}

/// Upsert the frontend record for discovered hardware. User-editable
/// fields (enable flags, priority) of an existing record survive;
/// hardware-derived fields are refreshed.
pub fn apply_frontend_added(
    conn: &Connection,
    adapter_no: u32,
    frontend_no: u8,
    info: &FrontendInfo,
) -> Result<()> {
    let key = FeKey {
        adapter_mac_address: info.adapter_mac_address,
        frontend_no,
    };
    conn.execute_batch("SAVEPOINT device_add")?;
    let mut fe = db::get_frontend(conn, &key)?.unwrap_or_else(|| Frontend {
        k: key,
        ..Frontend::default()
    });
    fe.card_mac_address = info.card_mac_address;
    fe.adapter_no = adapter_no as i32;
    fe.adapter_name = info.adapter_name.clone();
    fe.card_short_name = info.card_short_name.clone();
    fe.present = true;
    fe.can_be_used = true;
    fe.delivery_systems = info.delivery_systems.clone();
    fe.rf_inputs = info.rf_inputs.clone();
    fe.supports = info.supports;
    db::put_frontend(conn, &fe)?;

    renumber_cards(conn)?;
    refresh_lnb_adapters(conn)?;
    conn.execute_batch("RELEASE device_add")?;
    info!(
        "frontend added: adapter {} frontend {} ({})",
        adapter_no, frontend_no, info.adapter_name
    );
    Ok(())
}

/// Mark a disappeared frontend. The record is kept so the reservation
/// history and user settings survive re-plugging.
pub fn apply_frontend_removed(conn: &Connection, adapter_no: u32, frontend_no: u8) -> Result<()> {
    for mut fe in db::list_frontends(conn)? {
        if fe.adapter_no != adapter_no as i32 || fe.k.frontend_no != frontend_no {
            continue;
        }
        mark_frontend_missing(&mut fe);
        db::put_frontend(conn, &fe)?;
        info!("frontend removed: adapter {} frontend {}", adapter_no, frontend_no);
    }
    refresh_lnb_adapters(conn)?;
    Ok(())
}

fn mark_frontend_missing(fe: &mut Frontend) {
    fe.present = false;
    fe.can_be_used = false;
    fe.adapter_no = -1;
    fe.adapter_name = format!("{}{}", MISSING_ADAPTER_PREFIX, fe.card_short_name);
}

/// Disable records whose hardware did not reappear during the initial
/// discovery scan.
pub fn disable_missing_frontends(conn: &Connection, live: &[FeKey]) -> Result<()> {
    for mut fe in db::list_frontends(conn)? {
        if live.contains(&fe.k) {
            continue;
        }
        let adapter_name = format!("{}{}", MISSING_ADAPTER_PREFIX, fe.card_short_name);
        if fe.present || fe.can_be_used || fe.adapter_name != adapter_name {
            mark_frontend_missing(&mut fe);
            db::put_frontend(conn, &fe)?;
        }
    }
    Ok(())
}

/// Give every card a dense unique `card_no`, keeping existing numbers
/// where possible. Returns whether anything changed.
pub fn renumber_cards(conn: &Connection) -> Result<bool> {
    let fes = db::list_frontends(conn)?;
    let mut numbers_in_use: HashSet<i32> = HashSet::new();
    let mut card_numbers: BTreeMap<i64, i32> = BTreeMap::new();

    for fe in &fes {
        let candidate = fe.card_no;
        card_numbers.entry(fe.card_mac_address).or_insert(
            if candidate < 0 || numbers_in_use.contains(&candidate) {
                -1
            } else {
                candidate
            },
        );
        if fe.card_no >= 0 {
            numbers_in_use.insert(fe.card_no);
        }
    }

    let mut next = 0;
    for card_no in card_numbers.values_mut() {
        if *card_no == -1 {
            while numbers_in_use.contains(&next) {
                next += 1;
            }
            numbers_in_use.insert(next);
            *card_no = next;
        }
    }

    let mut changed = false;
    for mut fe in fes {
        let card_no = card_numbers[&fe.card_mac_address];
        if fe.card_no != card_no {
            fe.card_no = card_no;
            changed = true;
            db::put_frontend(conn, &fe)?;
        }
    }
    Ok(changed)
}

/// Refresh the adapter fields cached in each LNB from the frontend
/// records on its card.
pub fn refresh_lnb_adapters(conn: &Connection) -> Result<()> {
    let fes = db::list_frontends(conn)?;
    for mut lnb in db::list_lnbs(conn)? {
        let reachable: Vec<&Frontend> = fes
            .iter()
            .filter(|fe| {
                fe.card_mac_address == lnb.k.card_mac_address
                    && fe.rf_inputs.contains(&lnb.k.rf_input)
            })
            .collect();
        let can_be_used = reachable.iter().any(|fe| fe.present && fe.can_be_used);
        let adapter_name = reachable
            .iter()
            .find(|fe| fe.present)
            .or(reachable.first())
            .map(|fe| fe.adapter_name.clone())
            .unwrap_or_default();
        if lnb.can_be_used != can_be_used || lnb.adapter_name != adapter_name {
            lnb.can_be_used = can_be_used;
            lnb.adapter_name = adapter_name;
            db::put_lnb(conn, &lnb)?;
        }
    }
    Ok(())
}

/// Probe reading identity hints from the device tree itself.
///
/// Platforms that expose `adapterN/mac` and `adapterN/name` nodes get
/// real identities; otherwise a stable identity is derived from the
/// adapter number so the records at least survive re-discovery on the
/// same slot.
pub struct FsProbe {
    root: PathBuf,
}

impl FsProbe {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn read_mac(dir: &Path) -> Option<i64> {
        let text = std::fs::read_to_string(dir.join("mac")).ok()?;
        i64::from_str_radix(&text.trim().replace(':', ""), 16).ok()
    }
}

impl ProbeFrontend for FsProbe {
    fn probe(&self, adapter_no: u32, _frontend_no: u8) -> Option<FrontendInfo> {
        let dir = self.root.join(format!("adapter{}", adapter_no));
        if !dir.exists() {
            return None;
        }
        let mac = Self::read_mac(&dir).unwrap_or(0xA000_0000 + adapter_no as i64);
        let name = std::fs::read_to_string(dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| format!("adapter{}", adapter_no));
        Some(FrontendInfo {
            adapter_mac_address: mac,
            card_mac_address: mac,
            adapter_name: name.clone(),
            card_short_name: name,
            delivery_systems: vec![
                DeliverySystem::DvbS,
                DeliverySystem::DvbS2,
                DeliverySystem::DvbC,
                DeliverySystem::DvbT,
            ],
            rf_inputs: vec![0],
            supports: FeSupports::default(),
        })
    }
}

/// The process-wide hot-plug watcher actor.
pub struct DeviceMonitor {
    db: Database,
    probe: Box<dyn ProbeFrontend>,
    root: PathBuf,
}

impl DeviceMonitor {
    pub fn new(db: Database, probe: Box<dyn ProbeFrontend>, root: PathBuf) -> Self {
        Self { db, probe, root }
    }

    /// Initial discovery: walk the device tree, upsert every frontend
    /// found, disable records whose hardware is gone and clear stale
    /// live-signal rows from an earlier crash.
    pub fn startup_scan(&mut self) -> Result<()> {
        let mut found: Vec<(u32, u8)> = Vec::new();
        if let Ok(adapters) = std::fs::read_dir(&self.root) {
            for adapter in adapters.flatten() {
                for frontend in std::fs::read_dir(adapter.path()).into_iter().flatten() {
                    if let Some(node) = frontend
                        .ok()
                        .map(|f| f.path())
                        .and_then(|p| parse_device_path(&self.root, &p))
                    {
                        found.push(node);
                    }
                }
            }
        }

        // Probe outside the write transaction.
        let mut discovered = Vec::new();
        for (adapter_no, frontend_no) in found {
            match self.probe.probe(adapter_no, frontend_no) {
                Some(info) => discovered.push((adapter_no, frontend_no, info)),
                None => warn!(
                    "could not probe adapter {} frontend {}",
                    adapter_no, frontend_no
                ),
            }
        }

        let txn = self.db.write_txn()?;
        db::clean_live_stats(&txn)?;
        let live: Vec<FeKey> = discovered
            .iter()
            .map(|(_, frontend_no, info)| FeKey {
                adapter_mac_address: info.adapter_mac_address,
                frontend_no: *frontend_no,
            })
            .collect();
        for (adapter_no, frontend_no, info) in &discovered {
            apply_frontend_added(&txn, *adapter_no, *frontend_no, info)?;
        }
        disable_missing_frontends(&txn, &live)?;
        txn.commit()?;
        Ok(())
    }

    /// Watch the device tree until the event channel closes.
    pub async fn run(mut self) -> std::result::Result<(), crate::Error> {
        self.startup_scan()?;

        let (tx, mut rx) = mpsc::channel::<DeviceEvent>(64);
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("device watcher error: {}", e);
                    return;
                }
            };
            for path in &event.paths {
                let Some((adapter_no, frontend_no)) = parse_device_path(&root, path) else {
                    continue;
                };
                let device_event = match event.kind {
                    notify::EventKind::Create(_) => DeviceEvent::FrontendAdded {
                        adapter_no,
                        frontend_no,
                    },
                    notify::EventKind::Remove(_) => DeviceEvent::FrontendRemoved {
                        adapter_no,
                        frontend_no,
                    },
                    _ => continue,
                };
                if tx.blocking_send(device_event).is_err() {
                    return;
                }
            }
        })
        .map_err(crate::Error::Watch)?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(crate::Error::Watch)?;
        info!("watching device tree {}", self.root.display());

        while let Some(event) = rx.recv().await {
            if let Err(e) = self.apply(event) {
                warn!("failed to apply device event {:?}: {}", event, e);
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: DeviceEvent) -> Result<()> {
        match event {
            DeviceEvent::FrontendAdded {
                adapter_no,
                frontend_no,
            } => {
                // Hardware I/O stays outside the write transaction.
                let Some(info) = self.probe.probe(adapter_no, frontend_no) else {
                    warn!(
                        "could not probe adapter {} frontend {}",
                        adapter_no, frontend_no
                    );
                    return Ok(());
                };
                let txn = self.db.write_txn()?;
                apply_frontend_added(&txn, adapter_no, frontend_no, &info)?;
                txn.commit()?;
            }
            DeviceEvent::FrontendRemoved {
                adapter_no,
                frontend_no,
            } => {
                let txn = self.db.write_txn()?;
                apply_frontend_removed(&txn, adapter_no, frontend_no)?;
                txn.commit()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvbpool_types::{Lnb, LnbKey};

    struct MockProbe;

    impl ProbeFrontend for MockProbe {
        fn probe(&self, adapter_no: u32, frontend_no: u8) -> Option<FrontendInfo> {
            Some(FrontendInfo {
                adapter_mac_address: 0xA000 + adapter_no as i64,
                card_mac_address: 0xC000 + (adapter_no / 2) as i64,
                adapter_name: format!("adapter{}/fe{}", adapter_no, frontend_no),
                card_short_name: format!("card{}", adapter_no / 2),
                delivery_systems: vec![DeliverySystem::DvbS2],
                rf_inputs: vec![0, 1],
                supports: FeSupports::default(),
            })
        }
    }

    #[test]
    fn add_then_remove_keeps_the_record() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let info = MockProbe.probe(0, 0).unwrap();
        apply_frontend_added(conn, 0, 0, &info).unwrap();

        let key = FeKey {
            adapter_mac_address: 0xA000,
            frontend_no: 0,
        };
        let fe = db::get_frontend(conn, &key).unwrap().unwrap();
        assert!(fe.present && fe.can_be_used);
        assert_eq!(fe.card_no, 0);

        apply_frontend_removed(conn, 0, 0).unwrap();
        let fe = db::get_frontend(conn, &key).unwrap().unwrap();
        assert!(!fe.present && !fe.can_be_used);
        assert_eq!(fe.adapter_no, -1);
        assert!(fe.adapter_name.starts_with(MISSING_ADAPTER_PREFIX));
    }

    #[test]
    fn user_settings_survive_rediscovery() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let info = MockProbe.probe(0, 0).unwrap();
        apply_frontend_added(conn, 0, 0, &info).unwrap();

        let key = FeKey {
            adapter_mac_address: 0xA000,
            frontend_no: 0,
        };
        let mut fe = db::get_frontend(conn, &key).unwrap().unwrap();
        fe.enable_dvbs = false;
        fe.priority = 7;
        db::put_frontend(conn, &fe).unwrap();

        apply_frontend_removed(conn, 0, 0).unwrap();
        apply_frontend_added(conn, 0, 0, &info).unwrap();
        let fe = db::get_frontend(conn, &key).unwrap().unwrap();
        assert!(!fe.enable_dvbs);
        assert_eq!(fe.priority, 7);
        assert!(fe.present);
    }

    #[test]
    fn cards_get_dense_unique_numbers() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        for adapter_no in [0, 1, 2, 3] {
            let info = MockProbe.probe(adapter_no, 0).unwrap();
            apply_frontend_added(conn, adapter_no, 0, &info).unwrap();
        }

        let mut by_card: BTreeMap<i64, HashSet<i32>> = BTreeMap::new();
        for fe in db::list_frontends(conn).unwrap() {
            by_card
                .entry(fe.card_mac_address)
                .or_default()
                .insert(fe.card_no);
        }
        // Two cards, each with one number, densely packed.
        assert_eq!(by_card.len(), 2);
        let all: HashSet<i32> = by_card.values().flatten().copied().collect();
        assert_eq!(all, HashSet::from([0, 1]));
    }

    #[test]
    fn lnb_adapter_fields_follow_the_hardware() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let lnb = Lnb::universal(LnbKey {
            card_mac_address: 0xC000,
            rf_input: 0,
            dish_id: 0,
            lnb_id: 1,
        });
        db::put_lnb(conn, &lnb).unwrap();

        let info = MockProbe.probe(0, 0).unwrap();
        apply_frontend_added(conn, 0, 0, &info).unwrap();
        let lnb = db::get_lnb(conn, &lnb.k).unwrap().unwrap();
        assert!(lnb.can_be_used);
        assert_eq!(lnb.adapter_name, "adapter0/fe0");

        apply_frontend_removed(conn, 0, 0).unwrap();
        let lnb = db::get_lnb(conn, &lnb.k).unwrap().unwrap();
        assert!(!lnb.can_be_used);
    }

    #[test]
    fn device_paths_parse_strictly() {
        let root = Path::new("/dev/dvb");
        assert_eq!(
            parse_device_path(root, Path::new("/dev/dvb/adapter2/frontend1")),
            Some((2, 1))
        );
        assert_eq!(
            parse_device_path(root, Path::new("/dev/dvb/adapter2/demux0")),
            None
        );
        assert_eq!(parse_device_path(root, Path::new("/dev/dvb/adapter2")), None);
        assert_eq!(
            parse_device_path(root, Path::new("/other/adapter2/frontend0")),
            None
        );
    }
}
