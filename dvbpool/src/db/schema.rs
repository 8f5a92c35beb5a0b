//! SQL schema for the shared reservation store.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sats (
    sat_pos INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS dvbs_muxes (
    sat_pos INTEGER NOT NULL,
    network_id INTEGER NOT NULL,
    ts_id INTEGER NOT NULL,
    t2mi_pid INTEGER NOT NULL,
    extra_id INTEGER NOT NULL,
    frequency INTEGER NOT NULL,
    pol INTEGER NOT NULL,
    symbol_rate INTEGER NOT NULL,
    stream_id INTEGER NOT NULL DEFAULT -1,
    modulation INTEGER NOT NULL DEFAULT 0,
    scan_status INTEGER NOT NULL DEFAULT 0,
    scan_id INTEGER NOT NULL DEFAULT 0,
    scan_result INTEGER NOT NULL DEFAULT 0,
    scan_duration INTEGER NOT NULL DEFAULT 0,
    scan_time INTEGER NOT NULL DEFAULT 0,
    epg_scan INTEGER NOT NULL DEFAULT 0,
    num_services INTEGER NOT NULL DEFAULT 0,
    epg_types TEXT NOT NULL DEFAULT '[]',
    tune_src INTEGER NOT NULL DEFAULT 1,
    mtime INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sat_pos, network_id, ts_id, t2mi_pid, extra_id)
);

CREATE INDEX IF NOT EXISTS idx_dvbs_muxes_sat_pol_freq
    ON dvbs_muxes (sat_pos, pol, frequency);
CREATE INDEX IF NOT EXISTS idx_dvbs_muxes_nid_tid
    ON dvbs_muxes (network_id, ts_id);

CREATE TABLE IF NOT EXISTS dvbc_muxes (
    sat_pos INTEGER NOT NULL,
    network_id INTEGER NOT NULL,
    ts_id INTEGER NOT NULL,
    t2mi_pid INTEGER NOT NULL,
    extra_id INTEGER NOT NULL,
    frequency INTEGER NOT NULL,
    symbol_rate INTEGER NOT NULL,
    stream_id INTEGER NOT NULL DEFAULT -1,
    modulation INTEGER NOT NULL DEFAULT 0,
    scan_status INTEGER NOT NULL DEFAULT 0,
    scan_id INTEGER NOT NULL DEFAULT 0,
    scan_result INTEGER NOT NULL DEFAULT 0,
    scan_duration INTEGER NOT NULL DEFAULT 0,
    scan_time INTEGER NOT NULL DEFAULT 0,
    epg_scan INTEGER NOT NULL DEFAULT 0,
    num_services INTEGER NOT NULL DEFAULT 0,
    epg_types TEXT NOT NULL DEFAULT '[]',
    tune_src INTEGER NOT NULL DEFAULT 1,
    mtime INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sat_pos, network_id, ts_id, t2mi_pid, extra_id)
);

CREATE INDEX IF NOT EXISTS idx_dvbc_muxes_freq ON dvbc_muxes (frequency);
CREATE INDEX IF NOT EXISTS idx_dvbc_muxes_nid_tid
    ON dvbc_muxes (network_id, ts_id);

CREATE TABLE IF NOT EXISTS dvbt_muxes (
    sat_pos INTEGER NOT NULL,
    network_id INTEGER NOT NULL,
    ts_id INTEGER NOT NULL,
    t2mi_pid INTEGER NOT NULL,
    extra_id INTEGER NOT NULL,
    frequency INTEGER NOT NULL,
    bandwidth INTEGER NOT NULL DEFAULT 8000,
    stream_id INTEGER NOT NULL DEFAULT -1,
    modulation INTEGER NOT NULL DEFAULT 0,
    scan_status INTEGER NOT NULL DEFAULT 0,
    scan_id INTEGER NOT NULL DEFAULT 0,
    scan_result INTEGER NOT NULL DEFAULT 0,
    scan_duration INTEGER NOT NULL DEFAULT 0,
    scan_time INTEGER NOT NULL DEFAULT 0,
    epg_scan INTEGER NOT NULL DEFAULT 0,
    num_services INTEGER NOT NULL DEFAULT 0,
    epg_types TEXT NOT NULL DEFAULT '[]',
    tune_src INTEGER NOT NULL DEFAULT 1,
    mtime INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sat_pos, network_id, ts_id, t2mi_pid, extra_id)
);

CREATE INDEX IF NOT EXISTS idx_dvbt_muxes_freq ON dvbt_muxes (frequency);
CREATE INDEX IF NOT EXISTS idx_dvbt_muxes_nid_tid
    ON dvbt_muxes (network_id, ts_id);

CREATE TABLE IF NOT EXISTS services (
    sat_pos INTEGER NOT NULL,
    network_id INTEGER NOT NULL,
    ts_id INTEGER NOT NULL,
    t2mi_pid INTEGER NOT NULL,
    extra_id INTEGER NOT NULL,
    service_id INTEGER NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    mtime INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sat_pos, network_id, ts_id, t2mi_pid, extra_id, service_id)
);

CREATE TABLE IF NOT EXISTS lnbs (
    card_mac_address INTEGER NOT NULL,
    rf_input INTEGER NOT NULL,
    dish_id INTEGER NOT NULL,
    lnb_id INTEGER NOT NULL,
    lnb_type INTEGER NOT NULL DEFAULT 0,
    rotor_control INTEGER NOT NULL DEFAULT 0,
    pol_type INTEGER NOT NULL DEFAULT 0,
    lof_low INTEGER NOT NULL,
    lof_high INTEGER NOT NULL,
    freq_low INTEGER NOT NULL,
    freq_mid INTEGER NOT NULL,
    freq_high INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT -1,
    enabled INTEGER NOT NULL DEFAULT 1,
    can_be_used INTEGER NOT NULL DEFAULT 1,
    usals_pos INTEGER NOT NULL,
    adapter_name TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (card_mac_address, rf_input, dish_id, lnb_id)
);

CREATE TABLE IF NOT EXISTS lnb_networks (
    card_mac_address INTEGER NOT NULL,
    rf_input INTEGER NOT NULL,
    dish_id INTEGER NOT NULL,
    lnb_id INTEGER NOT NULL,
    sat_pos INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT -1,
    usals_pos INTEGER NOT NULL,
    PRIMARY KEY (card_mac_address, rf_input, dish_id, lnb_id, sat_pos)
);

CREATE TABLE IF NOT EXISTS rf_couplers (
    card_mac_address INTEGER NOT NULL,
    rf_input INTEGER NOT NULL,
    coupler_id INTEGER NOT NULL,
    PRIMARY KEY (card_mac_address, rf_input)
);

CREATE TABLE IF NOT EXISTS frontends (
    adapter_mac_address INTEGER NOT NULL,
    frontend_no INTEGER NOT NULL,
    card_mac_address INTEGER NOT NULL,
    adapter_no INTEGER NOT NULL DEFAULT -1,
    card_no INTEGER NOT NULL DEFAULT -1,
    adapter_name TEXT NOT NULL DEFAULT '',
    card_short_name TEXT NOT NULL DEFAULT '',
    present INTEGER NOT NULL DEFAULT 0,
    can_be_used INTEGER NOT NULL DEFAULT 0,
    enable_dvbs INTEGER NOT NULL DEFAULT 1,
    enable_dvbc INTEGER NOT NULL DEFAULT 1,
    enable_dvbt INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    delivery_systems TEXT NOT NULL DEFAULT '[]',
    rf_inputs TEXT NOT NULL DEFAULT '[]',
    blindscan INTEGER NOT NULL DEFAULT 0,
    multistream INTEGER NOT NULL DEFAULT 0,
    spectrum_fft INTEGER NOT NULL DEFAULT 0,
    spectrum_sweep INTEGER NOT NULL DEFAULT 0,
    sub_owner INTEGER NOT NULL DEFAULT -1,
    sub_use_count INTEGER NOT NULL DEFAULT 0,
    sub_lnb_card_mac INTEGER NOT NULL DEFAULT -1,
    sub_lnb_rf_input INTEGER NOT NULL DEFAULT 0,
    sub_lnb_dish_id INTEGER NOT NULL DEFAULT -1,
    sub_lnb_id INTEGER NOT NULL DEFAULT -1,
    sub_pol INTEGER NOT NULL DEFAULT 4,
    sub_band INTEGER NOT NULL DEFAULT 2,
    sub_usals_pos INTEGER NOT NULL DEFAULT -32768,
    sub_frequency INTEGER NOT NULL DEFAULT 0,
    sub_stream_id INTEGER NOT NULL DEFAULT -1,
    PRIMARY KEY (adapter_mac_address, frontend_no)
);

CREATE INDEX IF NOT EXISTS idx_frontends_card ON frontends (card_mac_address);
CREATE INDEX IF NOT EXISTS idx_frontends_adapter ON frontends (adapter_no);

CREATE TABLE IF NOT EXISTS signal_stats (
    adapter_mac_address INTEGER NOT NULL,
    frontend_no INTEGER NOT NULL,
    live INTEGER NOT NULL DEFAULT 0,
    snr REAL NOT NULL DEFAULT 0,
    strength REAL NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (adapter_mac_address, frontend_no)
);
"#;
