//! Device discovery: the hot-plug watcher and the store updates it
//! drives.

pub mod monitor;

pub use monitor::{
    apply_frontend_added, apply_frontend_removed, disable_missing_frontends, parse_device_path,
    refresh_lnb_adapters, renumber_cards, DeviceEvent, DeviceMonitor, FrontendInfo, FsProbe,
    ProbeFrontend,
};
