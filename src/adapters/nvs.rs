//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the hub.
//!
//! - Config validation: all fields are range-checked before persistence.
//! - Encrypted NVS: on ESP32 the "wifi" namespace lives on the encrypted
//!   NVS partition. The simulation backend uses plaintext (dev/test only).
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::app::state;
use crate::config::HubConfig;
use crate::rpc::envelope::Response;
use crate::utils::is_printable_name;
use log::info;

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "nesvoy";
const CONFIG_KEY: &str = "hubcfg";

#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 4000;

/// NVS names are at most 15 bytes plus NUL.
const NVS_NAME_LEN: usize = 16;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Load the stored config, falling back to defaults when there is
    /// none or it no longer validates.
    pub fn load_or_default(&self) -> HubConfig {
        match self.load() {
            Ok(cfg) => match validate_config(&cfg) {
                Ok(()) => cfg,
                Err(e) => {
                    log::warn!("NvsAdapter: stored config rejected ({}), using defaults", e);
                    HubConfig::default()
                }
            },
            Err(e) => {
                log::warn!("NvsAdapter: config load failed ({}), using defaults", e);
                HubConfig::default()
            }
        }
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = nvs_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }
}

/// NUL-terminated copy of an NVS namespace or key, truncated to 15 bytes.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn nvs_name(name: &str) -> [u8; NVS_NAME_LEN] {
    let mut buf = [0u8; NVS_NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NVS_NAME_LEN - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

pub fn validate_config(cfg: &HubConfig) -> Result<(), ConfigError> {
    if !is_printable_name(&cfg.device_name, 24) {
        return Err(ConfigError::ValidationFailed(
            "device_name must be 1–24 printable ASCII bytes",
        ));
    }
    if !(16..=512).contains(&cfg.write_capacity) {
        return Err(ConfigError::ValidationFailed(
            "write_capacity must be 16–512",
        ));
    }
    let min_read = Response::max_error_len().max(16);
    if usize::from(cfg.read_capacity) < min_read || cfg.read_capacity > 512 {
        return Err(ConfigError::ValidationFailed(
            "read_capacity must fit the largest error response and be at most 512",
        ));
    }
    if cfg.initial_state_mask & !(state::CONNECTED | state::PROVISIONED | state::UNPROVISIONED) != 0 {
        return Err(ConfigError::ValidationFailed(
            "initial_state_mask has unknown flags",
        ));
    }
    if !(1..=1000).contains(&cfg.loop_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "loop_interval_ms must be 1–1000",
        ));
    }
    if !(100..=600_000).contains(&cfg.pending_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "pending_timeout_ms must be 100–600000",
        ));
    }
    if cfg.pending_timeout_ms <= cfg.loop_interval_ms {
        return Err(ConfigError::ValidationFailed(
            "pending_timeout_ms must be > loop_interval_ms",
        ));
    }
    if !(0x20..=0x4000).contains(&cfg.adv_interval) {
        return Err(ConfigError::ValidationFailed(
            "adv_interval must be 32–16384 (20 ms–10.24 s)",
        ));
    }
    if !(6..=3200).contains(&cfg.min_conn_interval) || !(6..=3200).contains(&cfg.max_conn_interval) {
        return Err(ConfigError::ValidationFailed(
            "connection intervals must be 6–3200 (7.5 ms–4 s)",
        ));
    }
    if cfg.min_conn_interval > cfg.max_conn_interval {
        return Err(ConfigError::ValidationFailed(
            "min_conn_interval must be <= max_conn_interval",
        ));
    }
    if cfg.slave_latency > 499 {
        return Err(ConfigError::ValidationFailed(
            "slave_latency must be 0–499",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<HubConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            if let Some(bytes) = self.store.borrow().get(&key) {
                let cfg: HubConfig =
                    postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
                info!("NvsAdapter: loaded config from store");
                Ok(cfg)
            } else {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(HubConfig::default())
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, false, |handle| {
                let key = nvs_name(CONFIG_KEY);
                let mut size: usize = 0;

                // First call: get size
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key.as_ptr() as *const _,
                        core::ptr::null_mut(),
                        &mut size,
                    )
                };
                if ret == ESP_ERR_NVS_NOT_FOUND {
                    return Err(ESP_ERR_NVS_NOT_FOUND);
                }
                if ret != ESP_OK || size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ret);
                }

                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }

                Ok(buf)
            });

            match result {
                Ok(bytes) => {
                    let cfg: HubConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from NVS ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => {
                    info!("NvsAdapter: no stored config, using defaults");
                    Ok(HubConfig::default())
                }
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}, using defaults", e);
                    Ok(HubConfig::default())
                }
            }
        }
    }

    fn save(&self, config: &HubConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            self.store.borrow_mut().insert(key, bytes);
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, true, |handle| {
                let key = nvs_name(CONFIG_KEY);
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        bytes.as_ptr() as *const _,
                        bytes.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
                    Ok(())
                }
                Err(e) => {
                    warn!("NvsAdapter: NVS write error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.store.borrow().get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = nvs_name(key);
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = nvs_name(key);
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = nvs_name(key);
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                // A namespace that was never written cannot be opened.
                Ok(()) => Ok(()),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = nvs_name(key);
                let ret = unsafe {
                    nvs_find_key(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}

impl Default for NvsAdapter {
    /// Falls back to an adapter without a working flash backend.
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::service::{CREDENTIALS_NAMESPACE, SSID_KEY};

    fn rejected(cfg: &HubConfig) -> bool {
        matches!(validate_config(cfg), Err(ConfigError::ValidationFailed(_)))
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(validate_config(&HubConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_device_name() {
        let mut cfg = HubConfig::default();
        cfg.device_name.clear();
        assert!(rejected(&cfg));
        cfg.device_name.push_str("bad\nname").unwrap();
        assert!(rejected(&cfg));
    }

    #[test]
    fn rejects_capacities_out_of_range() {
        assert!(rejected(&HubConfig {
            write_capacity: 8,
            ..Default::default()
        }));
        assert!(rejected(&HubConfig {
            read_capacity: 1024,
            ..Default::default()
        }));
    }

    #[test]
    fn read_capacity_must_hold_any_error_response() {
        let floor = Response::max_error_len();
        let at_floor = HubConfig {
            read_capacity: floor as u16,
            ..Default::default()
        };
        assert!(validate_config(&at_floor).is_ok());
        assert!(rejected(&HubConfig {
            read_capacity: floor as u16 - 1,
            ..Default::default()
        }));
        assert!(rejected(&HubConfig {
            read_capacity: 16,
            ..Default::default()
        }));
    }

    #[test]
    fn rejects_unknown_state_flags() {
        assert!(rejected(&HubConfig {
            initial_state_mask: 0b1000,
            ..Default::default()
        }));
    }

    #[test]
    fn rejects_timeout_not_above_loop_interval() {
        assert!(rejected(&HubConfig {
            pending_timeout_ms: 500,
            loop_interval_ms: 500,
            ..Default::default()
        }));
    }

    #[test]
    fn rejects_inverted_connection_interval() {
        assert!(rejected(&HubConfig {
            min_conn_interval: 40,
            max_conn_interval: 20,
            ..Default::default()
        }));
    }

    #[test]
    fn config_save_load_roundtrip() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = HubConfig {
            pending_timeout_ms: 3000,
            adv_interval: 800,
            ..Default::default()
        };
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap(), cfg);
        assert_eq!(nvs.load_or_default(), cfg);
    }

    #[test]
    fn save_refuses_invalid_config() {
        let nvs = NvsAdapter::new().unwrap();
        let bad = HubConfig {
            slave_latency: 500,
            ..Default::default()
        };
        assert!(nvs.save(&bad).is_err());
        assert_eq!(nvs.load().unwrap(), HubConfig::default());
    }

    #[test]
    fn corrupted_config_falls_back_to_defaults() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write(CONFIG_NAMESPACE, CONFIG_KEY, &[0xFF; 3]).unwrap();
        assert_eq!(nvs.load(), Err(ConfigError::Corrupted));
        assert_eq!(nvs.load_or_default(), HubConfig::default());
    }

    #[test]
    fn storage_round_trip() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write(CREDENTIALS_NAMESPACE, SSID_KEY, b"HomeWiFi").unwrap();
        assert!(nvs.exists(CREDENTIALS_NAMESPACE, SSID_KEY));

        let mut buf = [0u8; 64];
        let len = nvs.read(CREDENTIALS_NAMESPACE, SSID_KEY, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"HomeWiFi");

        nvs.delete(CREDENTIALS_NAMESPACE, SSID_KEY).unwrap();
        assert!(!nvs.exists(CREDENTIALS_NAMESPACE, SSID_KEY));
        // Deleting again is not an error.
        nvs.delete(CREDENTIALS_NAMESPACE, SSID_KEY).unwrap();
    }

    #[test]
    fn storage_read_missing_key() {
        let nvs = NvsAdapter::new().unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(nvs.read("ns", "nope", &mut buf), Err(StorageError::NotFound));
    }

    #[test]
    fn namespace_isolation() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("ns_a", "key", b"alpha").unwrap();
        nvs.write("ns_b", "key", b"bravo").unwrap();

        let mut buf = [0u8; 64];
        let len = nvs.read("ns_a", "key", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"alpha");
        let len = nvs.read("ns_b", "key", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"bravo");
    }

    #[test]
    fn nvs_names_are_nul_terminated() {
        let n = nvs_name("a-very-long-namespace-name");
        assert_eq!(n[NVS_NAME_LEN - 1], 0);
        assert_eq!(&n[..15], b"a-very-long-nam");
    }
}
