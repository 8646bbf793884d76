//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter          | Implements         | Connects to               |
//! |------------------|--------------------|---------------------------|
//! | `ble`            | GattLink           | Bluedroid GATT server     |
//! | `block_transfer` | PeerNotifier       | GattLink (fragmentation)  |
//! | `log_sink`       | EventSink          | Serial log output         |
//! | `nvs`            | ConfigPort         | NVS / in-memory store     |
//! |                  | StoragePort        |                           |

pub mod ble;
pub mod block_transfer;
pub mod log_sink;
pub mod nvs;
