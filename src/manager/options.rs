//! Per-service persistent options
//!
//! Free-form key/value strings that survive reboots, one regular file
//! per key under `options/<service>/`. Writes go through a temp file
//! and rename so readers never see a torn value.

use std::fs;

use super::{valid_name, Manager, StateError};
use crate::layout::{atomic_write, ls_dir};

impl Manager {
    /// The stored value of `option`, or `None` when it was never set.
    pub fn get_service_option(&self, service: &str, option: &str) -> Option<String> {
        if !valid_name(service) || !valid_name(option) {
            return None;
        }
        fs::read_to_string(self.layout().option_file(service, option)).ok()
    }

    /// Persist `value` under `option` for the service.
    pub fn set_service_option(
        &self,
        service: &str,
        option: &str,
        value: &str,
    ) -> Result<(), StateError> {
        if !valid_name(service) {
            return Err(StateError::InvalidName(service.to_string()));
        }
        if !valid_name(option) {
            return Err(StateError::InvalidName(option.to_string()));
        }
        let dir = self.layout().options_dir(service);
        fs::create_dir_all(&dir)?;
        atomic_write(&self.layout().option_file(service, option), value.as_bytes())?;
        Ok(())
    }

    /// Sorted list of the option keys set for a service.
    pub fn service_options(&self, service: &str) -> Vec<String> {
        if !valid_name(service) {
            return Vec::new();
        }
        ls_dir(&self.layout().options_dir(service))
    }
}
