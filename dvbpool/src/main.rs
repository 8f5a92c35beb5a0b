//! dvbpool: reservation CLI and device monitor for the shared tuner
//! store.
//!
//! Every reservation verb opens the shared database, runs under one
//! write transaction and prints the resulting reservation as JSON.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{error, info};
use serde_json::json;

use dvbpool::config;
use dvbpool::db::{self, Database};
use dvbpool::devices::monitor::FsProbe;
use dvbpool::devices::DeviceMonitor;
use dvbpool::mux::update_mux_always;
use dvbpool::reserve;
use dvbpool_types::{
    AnyMux, DvbcMux, DvbsMux, DvbtMux, FeKey, LnbKey, MuxKey, MuxPreserve, PlsSearchRange,
    Polarisation, ScanStatus, TuneOptions,
};

/// dvbpool - tuner reservation arbiter for a multi-tuner DVB receiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the shared database file
    #[arg(short, long, default_value = "dvbpool.db")]
    database: PathBuf,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct LnbArgs {
    /// MAC address of the card the LNB is cabled to
    #[arg(long)]
    card_mac: i64,

    /// RF input the LNB feeds
    #[arg(long)]
    rf_input: u8,

    /// Dish the LNB sits on; -1 for a dish of its own
    #[arg(long, default_value_t = -1)]
    dish_id: i32,

    #[arg(long)]
    lnb_id: i32,
}

impl LnbArgs {
    fn key(&self) -> LnbKey {
        LnbKey {
            card_mac_address: self.card_mac,
            rf_input: self.rf_input,
            dish_id: self.dish_id,
            lnb_id: self.lnb_id,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
struct MuxArgs {
    /// Delivery system: s, c or t
    #[arg(long, default_value = "s")]
    delsys: String,

    /// Satellite position in 0.01 degree units (satellite only)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    sat_pos: i16,

    /// Frequency in kHz
    #[arg(long)]
    frequency: u32,

    /// Polarisation: H, V, L or R (satellite only)
    #[arg(long, default_value = "H")]
    pol: String,

    /// Symbol rate in symbols per second
    #[arg(long, default_value_t = 27_500_000)]
    symbol_rate: u32,

    /// Multistream id; -1 for single stream
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    stream_id: i32,
}

impl MuxArgs {
    fn parse_pol(&self) -> Result<Polarisation, String> {
        match self.pol.to_ascii_uppercase().as_str() {
            "H" => Ok(Polarisation::H),
            "V" => Ok(Polarisation::V),
            "L" => Ok(Polarisation::L),
            "R" => Ok(Polarisation::R),
            other => Err(format!("unknown polarisation {:?}", other)),
        }
    }

    fn dvbs_mux(&self) -> Result<DvbsMux, String> {
        Ok(DvbsMux {
            k: MuxKey {
                sat_pos: self.sat_pos,
                ..MuxKey::default()
            },
            frequency: self.frequency,
            pol: self.parse_pol()?,
            symbol_rate: self.symbol_rate,
            stream_id: self.stream_id,
            ..DvbsMux::default()
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,

    /// Watch the device tree and keep frontend records current
    Monitor {
        /// Root of the adapter device tree
        #[arg(long)]
        dev_root: Option<PathBuf>,
    },

    /// Reserve hardware for tuning a mux
    SubscribeMux {
        #[command(flatten)]
        mux: MuxArgs,

        /// Request blindscan-capable hardware
        #[arg(long)]
        blindscan: bool,
    },

    /// Reserve an LNB exclusively (free dish movement and switching)
    SubscribeLnb {
        #[command(flatten)]
        lnb: LnbArgs,
    },

    /// Reserve a specific LNB for tuning a mux
    SubscribeLnbMux {
        #[command(flatten)]
        lnb: LnbArgs,

        #[command(flatten)]
        mux: MuxArgs,

        #[arg(long)]
        blindscan: bool,

        /// First PLS code to search during a blind tune
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        pls_start: i32,

        /// Last PLS code to search during a blind tune
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        pls_end: i32,
    },

    /// Reserve an LNB exclusively with spectrum-capable hardware
    SubscribeSpectrum {
        #[command(flatten)]
        lnb: LnbArgs,
    },

    /// Merge a JSON list of muxes into the store and mark them for
    /// scanning
    ScanMuxes {
        /// JSON file with an array of muxes
        #[arg(long)]
        file: PathBuf,
    },

    /// Release one use of a reserved frontend
    Unsubscribe {
        #[arg(long)]
        adapter_mac: i64,

        #[arg(long, default_value_t = 0)]
        frontend_no: u8,
    },
}

fn tune_options(tuning: &config::TuningSection, blindscan: bool) -> TuneOptions {
    TuneOptions {
        need_blind_tune: blindscan,
        may_move_dish: tuning.may_move_dish,
        dish_move_penalty: tuning.dish_move_penalty,
        resource_reuse_bonus: tuning.resource_reuse_bonus,
        ..TuneOptions::default()
    }
}

fn require_lnb(conn: &rusqlite::Connection, key: &LnbKey) -> Result<dvbpool_types::Lnb, String> {
    db::get_lnb(conn, key)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no such LNB: {:?}", key))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = config::default_config_path(cli.config.clone());
    let file_config = match &config_path {
        Some(path) => match config::load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => config::ConfigFile::default(),
    };

    let log_dir = match file_config.logging.log_dir.as_deref() {
        Some(dir) if cli.log_dir.to_string_lossy() == "logs" => PathBuf::from(dir),
        _ => cli.log_dir.clone(),
    };
    let retention = file_config
        .logging
        .retention_days
        .unwrap_or(cli.log_retention_days);
    dvbpool::logging::init_logging(
        &log_dir,
        retention,
        cli.verbose,
        file_config.logging.level.as_deref(),
    )
    .expect("Failed to initialize logging");

    let db_path = file_config
        .database
        .path
        .clone()
        .map(PathBuf::from)
        .unwrap_or(cli.database.clone());
    info!("opening database {:?}", db_path);
    let mut db = match Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("failed to open database: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Init => {
            println!("{}", json!({ "initialized": db_path }));
        }
        Command::Monitor { dev_root } => {
            let root = dev_root
                .or_else(|| file_config.devices.root.clone().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("/dev/dvb"));
            let probe = Box::new(FsProbe::new(root.clone()));
            let monitor = DeviceMonitor::new(db, probe, root);
            tokio::select! {
                result = monitor.run() => result?,
                _ = tokio::signal::ctrl_c() => info!("device monitor stopped"),
            }
        }
        Command::SubscribeMux { mux, blindscan } => {
            let options = tune_options(&file_config.tuning, blindscan);
            let txn = db.write_txn()?;
            match mux.delsys.as_str() {
                "s" => {
                    let dvbs = mux.dvbs_mux()?;
                    let reservation =
                        reserve::subscribe_lnb_band_pol_sat(&txn, &dvbs, None, None, &options)?;
                    txn.commit()?;
                    println!("{}", serde_json::to_string_pretty(&reservation)?);
                }
                "c" => {
                    let dvbc = DvbcMux {
                        frequency: mux.frequency,
                        symbol_rate: mux.symbol_rate,
                        stream_id: mux.stream_id,
                        ..DvbcMux::default()
                    };
                    let (fe, _) =
                        reserve::subscribe_dvbc_or_dvbt_mux(&txn, &dvbc, None, blindscan)?;
                    txn.commit()?;
                    println!("{}", serde_json::to_string_pretty(&fe)?);
                }
                "t" => {
                    let dvbt = DvbtMux {
                        frequency: mux.frequency,
                        stream_id: mux.stream_id,
                        ..DvbtMux::default()
                    };
                    let (fe, _) =
                        reserve::subscribe_dvbc_or_dvbt_mux(&txn, &dvbt, None, blindscan)?;
                    txn.commit()?;
                    println!("{}", serde_json::to_string_pretty(&fe)?);
                }
                other => return Err(format!("unknown delivery system {:?}", other).into()),
            }
        }
        Command::SubscribeLnb { lnb } => {
            let txn = db.write_txn()?;
            let lnb = require_lnb(&txn, &lnb.key())?;
            let (fe, _) = reserve::subscribe_lnb_exclusive(&txn, &lnb, None, false, false)?;
            txn.commit()?;
            println!("{}", serde_json::to_string_pretty(&fe)?);
        }
        Command::SubscribeLnbMux {
            lnb,
            mux,
            blindscan,
            pls_start,
            pls_end,
        } => {
            let mut options = tune_options(&file_config.tuning, blindscan);
            options.pls_search_range = PlsSearchRange {
                start: pls_start,
                end: pls_end,
                ..PlsSearchRange::default()
            };
            let txn = db.write_txn()?;
            let lnb = require_lnb(&txn, &lnb.key())?;
            let dvbs = mux.dvbs_mux()?;
            let reservation =
                reserve::subscribe_lnb_band_pol_sat(&txn, &dvbs, Some(&lnb), None, &options)?;
            txn.commit()?;
            println!("{}", serde_json::to_string_pretty(&reservation)?);
        }
        Command::SubscribeSpectrum { lnb } => {
            let txn = db.write_txn()?;
            let lnb = require_lnb(&txn, &lnb.key())?;
            let (fe, _) = reserve::subscribe_lnb_exclusive(&txn, &lnb, None, false, true)?;
            txn.commit()?;
            println!("{}", serde_json::to_string_pretty(&fe)?);
        }
        Command::ScanMuxes { file } => {
            let muxes: Vec<AnyMux> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let scan_id = std::process::id() as i32;
            let txn = db.write_txn()?;
            let mut verdicts = Vec::new();
            for mut mux in muxes {
                let common = mux.common_mut();
                common.scan_status = ScanStatus::Pending;
                common.scan_id = scan_id;
                let preserve =
                    MuxPreserve::SCAN_DATA | MuxPreserve::NUM_SERVICES | MuxPreserve::EPG_TYPES;
                let verdict = update_mux_always(&txn, &mut mux, now(), preserve)?;
                verdicts.push(json!({ "key": mux.key(), "verdict": verdict }));
            }
            txn.commit()?;
            println!("{}", serde_json::to_string_pretty(&verdicts)?);
        }
        Command::Unsubscribe {
            adapter_mac,
            frontend_no,
        } => {
            let key = FeKey {
                adapter_mac_address: adapter_mac,
                frontend_no,
            };
            let txn = db.write_txn()?;
            let remaining = reserve::unsubscribe(&txn, &key)?;
            txn.commit()?;
            println!("{}", json!({ "remaining_use_count": remaining }));
        }
    }
    Ok(())
}
