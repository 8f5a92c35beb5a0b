//! Owner-pid liveness probing.
//!
//! Reservations carry the pid of the owning process. A subscription
//! whose owner died is reaped lazily: every reader of an `fe.sub`
//! record verifies the owner's liveness and treats a dead owner as
//! unreserved. The probe must be constant-time and failure-free.

use log::debug;

use dvbpool_types::Frontend;

/// Whether the process owning a reservation still exists.
#[cfg(unix)]
pub fn owner_is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid < 0 {
        return false;
    }
    if pid == std::process::id() as i32 {
        return true;
    }
    // Signal 0 probes existence without delivering anything. EPERM
    // still means the process exists.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn owner_is_alive(pid: i32) -> bool {
    // No cheap probe available; only our own reservations are known
    // to be live.
    pid >= 0 && pid == std::process::id() as i32
}

/// Whether a frontend holds a live reservation. A record owned by a
/// dead process counts as free.
pub fn is_subscribed(fe: &Frontend) -> bool {
    if fe.sub.owner < 0 {
        return false;
    }
    if !owner_is_alive(fe.sub.owner) {
        debug!("process pid={} has died", fe.sub.owner);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvbpool_types::FeSubscription;

    #[test]
    fn our_own_pid_is_alive() {
        assert!(owner_is_alive(std::process::id() as i32));
        assert!(!owner_is_alive(-1));
    }

    #[test]
    fn dead_owner_makes_frontend_free() {
        let mut fe = Frontend::default();
        assert!(!is_subscribed(&fe));

        fe.sub = FeSubscription {
            owner: std::process::id() as i32,
            use_count: 1,
            ..FeSubscription::default()
        };
        assert!(is_subscribed(&fe));

        // Pids near i32::MAX are never allocated on real systems.
        fe.sub.owner = i32::MAX - 1;
        assert!(!is_subscribed(&fe));
    }
}
