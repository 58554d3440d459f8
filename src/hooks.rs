//! Plugin hook points
//!
//! The host wires a single callback into the [`Manager`](crate::Manager)
//! at construction time. The core invokes it at the transition points
//! below; the return value is never consulted here, failures are the
//! host's to log. The numeric values are part of the plugin ABI.
//!
//! The service hooks come in four phases. After `_in` the driver may
//! start other services first; `_now` means the service really is being
//! acted on, and `_done` fires before scheduled followers are kicked
//! off, strictly before `_out`.

/// Points at which a plugin is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    RunlevelStopIn = 1,
    RunlevelStopOut = 4,
    RunlevelStartIn = 5,
    RunlevelStartOut = 8,
    /// An init script requested the transition be aborted.
    Abort = 99,
    ServiceStopIn = 101,
    ServiceStopNow = 102,
    ServiceStopDone = 103,
    ServiceStopOut = 104,
    ServiceStartIn = 105,
    ServiceStartNow = 106,
    ServiceStartDone = 107,
    ServiceStartOut = 108,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunlevelStopIn => "runlevel_stop_in",
            Self::RunlevelStopOut => "runlevel_stop_out",
            Self::RunlevelStartIn => "runlevel_start_in",
            Self::RunlevelStartOut => "runlevel_start_out",
            Self::Abort => "abort",
            Self::ServiceStopIn => "service_stop_in",
            Self::ServiceStopNow => "service_stop_now",
            Self::ServiceStopDone => "service_stop_done",
            Self::ServiceStopOut => "service_stop_out",
            Self::ServiceStartIn => "service_start_in",
            Self::ServiceStartNow => "service_start_now",
            Self::ServiceStartDone => "service_start_done",
            Self::ServiceStartOut => "service_start_out",
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The host-provided callback: hook point plus runlevel or service name.
pub type HookFn = dyn Fn(Hook, &str) -> i32 + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_values_stable() {
        assert_eq!(Hook::RunlevelStopIn as i32, 1);
        assert_eq!(Hook::RunlevelStartOut as i32, 8);
        assert_eq!(Hook::Abort as i32, 99);
        assert_eq!(Hook::ServiceStopIn as i32, 101);
        assert_eq!(Hook::ServiceStartOut as i32, 108);
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::ServiceStartNow.as_str(), "service_start_now");
        assert_eq!(Hook::RunlevelStopOut.to_string(), "runlevel_stop_out");
    }
}
