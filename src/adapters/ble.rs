//! BLE block-transfer adapter.
//!
//! Hosts the GATT service the peer talks to and implements [`GattLink`]
//! for the [`BlockTransport`](super::block_transfer::BlockTransport).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## GATT Service Layout
//!
//! Service `0xFE8E`, open link (no pairing).
//!
//! | Characteristic | UUID                                    | Perms          |
//! |----------------|-----------------------------------------|----------------|
//! | Request        | `6e650001-…-c3a0f1d24b7e`               | Write          |
//! | Response       | `6e650002-…-c3a0f1d24b7e`               | Read+Indicate  |
//!
//! Callbacks run on the Bluedroid task. They only copy bytes into the
//! bridge buffers below and push a [`crate::events::Event`].

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Mutex;

use log::{info, warn};

use super::block_transfer::{BlockTransferError, DEFAULT_MTU, GattLink, MAX_MTU};
use crate::config::HubConfig;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID16: u16 = 0xFE8E;
pub const CHAR_REQUEST: u128 = 0x6e650001_5a8c_4f1e_9b2d_c3a0f1d24b7e;
pub const CHAR_RESPONSE: u128 = 0x6e650002_5a8c_4f1e_9b2d_c3a0f1d24b7e;

/// Largest fragment a single ATT write can carry.
pub const MAX_FRAGMENT_LEN: usize = MAX_MTU - 3;
const FRAGMENT_QUEUE_DEPTH: usize = 8;

/// Supervision timeout requested on connect, in 10 ms units.
#[cfg(target_os = "espidf")]
const SUPERVISION_TIMEOUT: u16 = 400;

pub type Fragment = heapless::Vec<u8, MAX_FRAGMENT_LEN>;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    StackInitFailed(i32),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackInitFailed(code) => write!(f, "BLE stack initialisation failed ({})", code),
        }
    }
}

impl std::error::Error for BleError {}

// ───────────────────────────────────────────────────────────────
// BLE state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

/// Advertising and connection parameters taken from [`HubConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub adv_interval: u16,
    pub min_conn_interval: u16,
    pub max_conn_interval: u16,
    pub slave_latency: u16,
}

impl LinkParams {
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            adv_interval: config.adv_interval,
            min_conn_interval: config.min_conn_interval,
            max_conn_interval: config.max_conn_interval,
            slave_latency: config.slave_latency,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Callback bridge
// ───────────────────────────────────────────────────────────────
//
// GATTS callbacks run in the Bluedroid task (not ISR), so std Mutex is
// safe. The main loop drains the fragment queue after a
// `FragmentReceived` event.

static FRAGMENT_QUEUE: Mutex<heapless::Deque<Fragment, FRAGMENT_QUEUE_DEPTH>> =
    Mutex::new(heapless::Deque::new());

/// Response bytes served to plain GATT reads.
static RESPONSE_MIRROR: Mutex<Vec<u8>> = Mutex::new(Vec::new());

/// Queue one written fragment. Returns `false` if it had to be dropped.
fn stash_fragment(data: &[u8]) -> bool {
    let Ok(fragment) = Fragment::from_slice(data) else {
        warn!("BLE: {}-byte write exceeds fragment limit", data.len());
        return false;
    };
    let Ok(mut queue) = FRAGMENT_QUEUE.lock() else {
        return false;
    };
    if queue.push_back(fragment).is_err() {
        warn!("BLE: fragment queue full, write dropped");
        return false;
    }
    true
}

/// Pop the oldest written fragment.
pub fn take_fragment() -> Option<Fragment> {
    FRAGMENT_QUEUE.lock().ok().and_then(|mut q| q.pop_front())
}

fn clear_fragments() {
    if let Ok(mut q) = FRAGMENT_QUEUE.lock() {
        q.clear();
    }
}

fn set_mirror(response: &[u8]) {
    if let Ok(mut mirror) = RESPONSE_MIRROR.lock() {
        mirror.clear();
        mirror.extend_from_slice(response);
    }
}

/// Copy mirror bytes from `offset` into `out`.
///
/// Returns the bytes copied and whether this read reached the end of a
/// held response; the mirror is then cleared.
fn serve_mirror(offset: usize, out: &mut [u8]) -> (usize, bool) {
    let Ok(mut mirror) = RESPONSE_MIRROR.lock() else {
        return (0, false);
    };
    if mirror.is_empty() || offset >= mirror.len() {
        return (0, false);
    }
    let n = (mirror.len() - offset).min(out.len());
    out[..n].copy_from_slice(&mirror[offset..offset + n]);
    let consumed = offset + n == mirror.len();
    if consumed {
        mirror.clear();
    }
    (n, consumed)
}

/// Indication confirms still owed for the response in flight.
///
/// The full fragment count is stored before the first indication goes
/// out, so a confirm that races ahead of the next send never looks like
/// the last one.
pub struct ConfirmCounter(AtomicU32);

impl ConfirmCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn expect(&self, fragments: usize) {
        let n = u32::try_from(fragments).unwrap_or(u32::MAX);
        self.0.store(n, AtomicOrdering::Release);
    }

    /// Count one confirm. True only for the last one owed.
    pub fn confirm(&self) -> bool {
        self.0
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| {
                n.checked_sub(1)
            })
            == Ok(1)
    }

    pub fn outstanding(&self) -> u32 {
        self.0.load(AtomicOrdering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(0, AtomicOrdering::Release);
    }
}

impl Default for ConfirmCounter {
    fn default() -> Self {
        Self::new()
    }
}

static PENDING_CONFIRMS: ConfirmCounter = ConfirmCounter::new();

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid glue
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These atomics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::AtomicBool;

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONNECTED: AtomicBool = AtomicBool::new(false);
#[cfg(target_os = "espidf")]
static BLE_MTU: AtomicU32 = AtomicU32::new(DEFAULT_MTU as u32);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_REQUEST_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_RESPONSE_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_RESPONSE_CCCD_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_SUBSCRIBED: AtomicBool = AtomicBool::new(false);

// Link parameters, copied in at start so the callbacks can restart
// advertising and request connection parameters.
#[cfg(target_os = "espidf")]
static BLE_ADV_INTERVAL: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_MIN_CONN: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_MAX_CONN: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_LATENCY: AtomicU32 = AtomicU32::new(0);

/// 0xFE8E expanded onto the Bluetooth base UUID, little-endian.
#[cfg(target_os = "espidf")]
static mut ADV_SERVICE_UUID: [u8; 16] = [
    0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00,
    0x8e, 0xfe, 0x00, 0x00,
];

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    t.uuid.uuid128 = uuid.to_le_bytes();
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let interval = BLE_ADV_INTERVAL.load(AtomicOrdering::Relaxed) as u16;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: interval,
        adv_int_max: interval,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe {
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

#[cfg(target_os = "espidf")]
unsafe fn send_write_response(gatts_if: u8, conn_id: u16, trans_id: u32) {
    use esp_idf_svc::sys::*;
    unsafe {
        esp_ble_gatts_send_response(
            gatts_if,
            conn_id,
            trans_id,
            esp_gatt_status_t_ESP_GATT_OK,
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => unsafe {
            start_advertising();
        },
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use crate::events::{Event, push_event};
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if as u32, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid16_to_esp(SERVICE_UUID16),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle as u32, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", svc_handle);
            BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                add_gatt_char(
                    svc_handle,
                    CHAR_REQUEST,
                    ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_WRITE,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
            match BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) {
                1 => {
                    BLE_REQUEST_CHAR_HANDLE.store(handle as u32, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: request char (handle={})", handle);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_RESPONSE,
                            ESP_GATT_PERM_READ,
                            ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_INDICATE,
                        );
                    }
                }
                2 => {
                    BLE_RESPONSE_CHAR_HANDLE.store(handle as u32, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: response char (handle={})", handle);
                    BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                    let mut cccd = uuid16_to_esp(ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16);
                    unsafe {
                        esp_ble_gatts_add_char_descr(
                            svc_handle,
                            &mut cccd,
                            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                            core::ptr::null_mut(),
                            core::ptr::null_mut(),
                        );
                    }
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let handle = unsafe { (*param).add_char_descr.attr_handle };
            BLE_RESPONSE_CCCD_HANDLE.store(handle as u32, AtomicOrdering::Relaxed);
            BLE_CHAR_STEP.store(4, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: response CCCD (handle={}), service ready", handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            BLE_CONN_ID.store(p.conn_id as u32, AtomicOrdering::Relaxed);
            BLE_CONNECTED.store(true, AtomicOrdering::Relaxed);
            BLE_MTU.store(DEFAULT_MTU as u32, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: client connected (conn_id={})", p.conn_id);

            let mut conn_params = esp_ble_conn_update_params_t {
                bda: p.remote_bda,
                min_int: BLE_MIN_CONN.load(AtomicOrdering::Relaxed) as u16,
                max_int: BLE_MAX_CONN.load(AtomicOrdering::Relaxed) as u16,
                latency: BLE_LATENCY.load(AtomicOrdering::Relaxed) as u16,
                timeout: SUPERVISION_TIMEOUT,
            };
            unsafe {
                esp_ble_gap_update_conn_params(&mut conn_params);
            }
            push_event(Event::PeerConnected);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            BLE_CONNECTED.store(false, AtomicOrdering::Relaxed);
            BLE_SUBSCRIBED.store(false, AtomicOrdering::Relaxed);
            PENDING_CONFIRMS.clear();
            BLE_CONN_ID.store(0, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: client disconnected");
            push_event(Event::PeerDisconnected);
            unsafe {
                start_advertising();
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let mtu = unsafe { (*param).mtu.mtu };
            BLE_MTU.store(u32::from(mtu), AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: MTU {}", mtu);
            push_event(Event::MtuChanged);
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let handle = p.handle as u32;
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };

            if handle == BLE_REQUEST_CHAR_HANDLE.load(AtomicOrdering::Relaxed) {
                if stash_fragment(data) {
                    push_event(Event::FragmentReceived);
                }
            } else if handle == BLE_RESPONSE_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                let enabled = data.first().is_some_and(|v| v & 0x02 != 0);
                BLE_SUBSCRIBED.store(enabled, AtomicOrdering::Relaxed);
                log::info!("BLE GATTS: indications {}", if enabled { "on" } else { "off" });
            }
            if p.need_rsp {
                unsafe {
                    send_write_response(gatts_if, p.conn_id, p.trans_id);
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
            let mtu = BLE_MTU.load(AtomicOrdering::Relaxed) as usize;
            let attr = unsafe { &mut rsp.attr_value };
            attr.handle = p.handle;
            attr.offset = p.offset;

            let mut consumed = false;
            if p.handle as u32 == BLE_RESPONSE_CHAR_HANDLE.load(AtomicOrdering::Relaxed) {
                let max = mtu.saturating_sub(1).min(attr.value.len());
                let (n, end) = serve_mirror(p.offset as usize, &mut attr.value[..max]);
                attr.len = n as u16;
                consumed = end;
            } else if p.handle as u32 == BLE_RESPONSE_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                attr.value[0] = if BLE_SUBSCRIBED.load(AtomicOrdering::Relaxed) { 0x02 } else { 0 };
                attr.len = 2;
            }
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        &mut rsp,
                    );
                }
            }
            if consumed {
                push_event(Event::ResponseConsumed);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let status = unsafe { (*param).conf.status };
            if status != esp_gatt_status_t_ESP_GATT_OK {
                log::warn!("BLE GATTS: indication not confirmed (status={})", status);
            }
            if PENDING_CONFIRMS.confirm() {
                push_event(Event::ResponseConsumed);
            }
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<24>,
    params: LinkParams,
    /// Simulation: negotiated MTU.
    #[cfg(not(target_os = "espidf"))]
    sim_mtu: usize,
    /// Simulation: every fragment "sent" on the response characteristic.
    #[cfg(not(target_os = "espidf"))]
    sim_indications: Vec<Vec<u8>>,
}

impl BleAdapter {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            state: BleState::Idle,
            device_name: config.device_name.clone(),
            params: LinkParams::from_config(config),
            #[cfg(not(target_os = "espidf"))]
            sim_mtu: DEFAULT_MTU,
            #[cfg(not(target_os = "espidf"))]
            sim_indications: Vec::new(),
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn params(&self) -> LinkParams {
        self.params
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, BleState::Advertising | BleState::Connected)
    }

    pub fn start(&mut self) -> Result<(), BleError> {
        info!("BLE: starting advertising as '{}'", self.device_name);
        clear_fragments();
        set_mirror(&[]);
        if let Err(e) = self.platform_start() {
            self.state = BleState::Failed;
            return Err(e);
        }
        self.state = BleState::Advertising;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.platform_stop();
        self.state = BleState::Idle;
        clear_fragments();
        set_mirror(&[]);
        info!("BLE: stopped");
    }

    pub fn on_central_connected(&mut self) {
        info!("BLE: central connected");
        self.state = BleState::Connected;
    }

    /// The link is gone: pending writes and the read mirror belong to it.
    pub fn on_central_disconnected(&mut self) {
        info!("BLE: central disconnected");
        clear_fragments();
        set_mirror(&[]);
        if self.state != BleState::Idle {
            self.state = BleState::Advertising;
        }
    }

    // ── Simulation hooks ──────────────────────────────────────

    /// Simulation: a peer write to the request characteristic.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_peer_write(&mut self, data: &[u8]) -> bool {
        stash_fragment(data)
    }

    /// Simulation: a peer read of the response characteristic.
    /// Returns the bytes and whether the response was read out.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_peer_read(&mut self, offset: usize) -> (Vec<u8>, bool) {
        let mut buf = vec![0u8; self.sim_mtu.saturating_sub(1)];
        let (n, consumed) = serve_mirror(offset, &mut buf);
        buf.truncate(n);
        (buf, consumed)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_mtu(&mut self, mtu: usize) {
        self.sim_mtu = mtu.clamp(DEFAULT_MTU, MAX_MTU);
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_take_indications(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.sim_indications)
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;

        BLE_ADV_INTERVAL.store(u32::from(self.params.adv_interval), AtomicOrdering::Relaxed);
        BLE_MIN_CONN.store(u32::from(self.params.min_conn_interval), AtomicOrdering::Relaxed);
        BLE_MAX_CONN.store(u32::from(self.params.max_conn_interval), AtomicOrdering::Relaxed);
        BLE_LATENCY.store(u32::from(self.params.slave_latency), AtomicOrdering::Relaxed);

        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let ret = esp_bt_controller_init(&mut bt_cfg);
            if ret != ESP_OK as i32 {
                log::error!("BLE: bt_controller_init failed ({})", ret);
                return Err(BleError::StackInitFailed(ret));
            }

            let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
            if ret != ESP_OK as i32 {
                log::error!("BLE: bt_controller_enable failed ({})", ret);
                return Err(BleError::StackInitFailed(ret));
            }

            let ret = esp_bluedroid_init();
            if ret != ESP_OK as i32 {
                log::error!("BLE: bluedroid_init failed ({})", ret);
                return Err(BleError::StackInitFailed(ret));
            }

            let ret = esp_bluedroid_enable();
            if ret != ESP_OK as i32 {
                log::error!("BLE: bluedroid_enable failed ({})", ret);
                return Err(BleError::StackInitFailed(ret));
            }

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            esp_ble_gatts_app_register(0);
            esp_ble_gatt_set_local_mtu(MAX_MTU as u16);

            // Device name must be NUL-terminated.
            let mut name = [0u8; 25];
            let bytes = self.device_name.as_bytes();
            name[..bytes.len()].copy_from_slice(bytes);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            // Advertising starts once the payload is set (GAP callback).
            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                include_txpower: false,
                min_interval: i32::from(self.params.min_conn_interval),
                max_interval: i32::from(self.params.max_conn_interval),
                service_uuid_len: 16,
                p_service_uuid: core::ptr::addr_of_mut!(ADV_SERVICE_UUID).cast(),
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..core::mem::zeroed()
            };
            esp_ble_gap_config_adv_data(&mut adv_data);
        }

        info!(
            "BLE(espidf): Bluedroid stack initialized, advertising as '{}'",
            self.device_name
        );
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), BleError> {
        info!(
            "BLE(sim): advertising '{}' (service {:04X}, interval {})",
            self.device_name, SERVICE_UUID16, self.params.adv_interval
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        use esp_idf_svc::sys::*;
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        info!("BLE(espidf): stack shut down");
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {
        info!("BLE(sim): stopped");
    }

    #[cfg(target_os = "espidf")]
    fn platform_indicate(&mut self, fragment: &[u8]) -> Result<(), BlockTransferError> {
        use esp_idf_svc::sys::*;
        let handle = BLE_RESPONSE_CHAR_HANDLE.load(AtomicOrdering::Relaxed);
        if handle == 0
            || !BLE_CONNECTED.load(AtomicOrdering::Relaxed)
            || !BLE_SUBSCRIBED.load(AtomicOrdering::Relaxed)
        {
            return Err(BlockTransferError::Link);
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as u8,
                BLE_CONN_ID.load(AtomicOrdering::Relaxed) as u16,
                handle as u16,
                fragment.len() as u16,
                fragment.as_ptr() as *mut u8,
                true,
            )
        };
        if ret != ESP_OK as i32 {
            return Err(BlockTransferError::Link);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_indicate(&mut self, fragment: &[u8]) -> Result<(), BlockTransferError> {
        if self.state != BleState::Connected {
            return Err(BlockTransferError::Link);
        }
        self.sim_indications.push(fragment.to_vec());
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// GattLink implementation
// ───────────────────────────────────────────────────────────────

impl GattLink for BleAdapter {
    #[cfg(target_os = "espidf")]
    fn mtu(&self) -> usize {
        BLE_MTU.load(AtomicOrdering::Relaxed) as usize
    }

    #[cfg(not(target_os = "espidf"))]
    fn mtu(&self) -> usize {
        self.sim_mtu
    }

    fn indicate(&mut self, fragment: &[u8]) -> Result<(), BlockTransferError> {
        self.platform_indicate(fragment)
    }

    fn set_readable(&mut self, response: &[u8]) {
        set_mirror(response);
    }

    fn expect_confirms(&mut self, fragments: usize) {
        PENDING_CONFIRMS.expect(fragments);
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
