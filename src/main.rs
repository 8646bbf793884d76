//! Nesvoy Firmware: Main Entry Point
//!
//! Hexagonal architecture with a single cooperative scheduling loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleAdapter ─▶ BlockTransport   LogEventSink   NvsAdapter      │
//! │  (GattLink)    (PeerNotifier)   (EventSink)    (Config+NVS)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              HubService (pure logic)                   │    │
//! │  │  TransferSlot · Router · DeferredSignal                │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Bluedroid callbacks ─▶ events queue ─▶ loop below             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};

use nesvoy::adapters::ble::{self, BleAdapter};
use nesvoy::adapters::block_transfer::{BlockTransport, GattLink};
use nesvoy::adapters::log_sink::LogEventSink;
use nesvoy::adapters::nvs::NvsAdapter;
use nesvoy::app::commands::register_builtin;
use nesvoy::app::service::HubService;
use nesvoy::error::Error;
use nesvoy::events::{self, Event};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Nesvoy v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = nvs.load_or_default();

    // ── 3. Hub core ───────────────────────────────────────────
    let mut sink = LogEventSink::new();
    let mut hub = HubService::new(config.clone());
    register_builtin(&mut hub).map_err(Error::from)?;
    hub.restore_provisioning(&nvs, &mut sink);

    // ── 4. Radio ──────────────────────────────────────────────
    let mut ble = BleAdapter::new(&config);
    ble.start()?;
    let mut transport = BlockTransport::new(ble, usize::from(config.write_capacity));

    info!("System ready. Entering event loop.");

    // ── 5. Scheduling loop ────────────────────────────────────
    let interval = Duration::from_millis(u64::from(config.loop_interval_ms));
    let mut last = Instant::now();

    loop {
        events::drain_events(|event| match event {
            Event::PeerConnected => {
                transport.link_mut().on_central_connected();
                hub.on_connected(&mut sink);
            }
            Event::PeerDisconnected => {
                transport.reset();
                transport.link_mut().on_central_disconnected();
                hub.on_disconnected(&mut sink);
            }
            Event::FragmentReceived => {
                while let Some(fragment) = ble::take_fragment() {
                    if let Some(block) = transport.on_fragment(&fragment) {
                        // Refusals are already logged and emitted by the hub.
                        let _ = hub.on_incoming_block(block, &mut sink);
                    }
                }
            }
            Event::ResponseConsumed => hub.on_read_complete(&mut sink),
            Event::MtuChanged => {
                info!("BLE: MTU now {}", transport.link().mtu());
            }
        });

        let now = Instant::now();
        let elapsed_ms = u32::try_from(now.duration_since(last).as_millis()).unwrap_or(u32::MAX);
        last = now;

        hub.tick(elapsed_ms, &mut sink);
        hub.pump_once(&mut nvs, &mut transport, &mut sink);

        std::thread::sleep(interval);
    }
}
