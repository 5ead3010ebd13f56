#![warn(missing_docs)]

//! Blegate tracks the connection and service-discovery state of a single Bluetooth Low Energy peripheral on top of an
//! asynchronous, event-delivering BLE transport, and exposes two awaitable milestones: "the device is connected" and
//! "the FIDO U2F service of the device has been discovered".
//!
//! Any number of tasks may wait for either milestone concurrently. Only one connect request is ever outstanding for a
//! device, and waiters are completed in the order they started waiting, however the transport happens to order or
//! duplicate its notifications.
//!
//! # Usage
//!
//! ```rust,no_run
//!# use blegate::{Adapter, AdapterGate, BluetoothEvent, Central, DeviceAddress, DeviceInfo, DeviceStatus, Result};
//!# struct Backend;
//!# #[async_trait::async_trait]
//!# impl AdapterGate for Backend {
//!#     async fn wait_powered_on(&self) -> Result<()> { Ok(()) }
//!# }
//!# impl Central for Backend {
//!#     fn connect(&self, _: &DeviceAddress) -> Result<()> { Ok(()) }
//!#     fn list_services(&self, _: &DeviceAddress) -> Result<()> { Ok(()) }
//!# }
//!# async fn run(events: impl futures_core::Stream<Item = BluetoothEvent> + Send + Unpin + 'static) -> Result<()> {
//!let adapter = Adapter::new(Backend);
//!let device = adapter.open_device(DeviceInfo {
//!    status: DeviceStatus::new("AB:CD:EF:01:23:45"),
//!    services: vec![blegate::Service::UUID],
//!});
//!
//!// Route transport notifications to the device
//!let pump = adapter.clone();
//!tokio::spawn(async move { pump.process_events(events).await });
//!
//!let service = device.wait_service_ready().await?;
//!println!("found {service}");
//!# Ok(())
//!# }
//! ```
//!
//! # Overview
//!
//! - [`Adapter`] owns the transport backend and routes [`BluetoothEvent`]s to the [`Device`] they concern.
//! - [`Device`] holds the state machine for one peripheral address:
//!   [`wait_connected`][Device::wait_connected] and [`wait_service_ready`][Device::wait_service_ready].
//! - [`Service`] is the handle to the discovered target service, passed on to code doing characteristic access.
//! - [`AdapterGate`] and [`Central`] are implemented by the application for its transport.
//!
//! # Liveness
//!
//! Waits never fail on their own. A connect request that the transport silently drops leaves its waiters pending
//! until a device-changed notification reports a connection. Use [`Device::wait_connected_timeout`] and
//! [`Device::wait_service_ready_timeout`] to bound the wait.
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing addresses and transport events.

pub mod btuuid;
pub mod error;

mod adapter;
mod backend;
mod device;
mod dispatch;
mod service;
mod state;

pub use adapter::Adapter;
pub use backend::{AdapterGate, Central, PowerGate};
pub use btuuid::BluetoothUuidExt;
pub use device::Device;
pub use error::Error;
pub use service::Service;
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Power state changes of the Bluetooth adapter, as reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterEvent {
    /// The adapter has become available (powered on and ready to use)
    Available,
    /// The adapter has become unavailable (powered off or otherwise disabled)
    Unavailable,
}

/// The transport's identifier for a peripheral, typically in the format `AB:CD:EF:01:23:45`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        DeviceAddress(address.to_owned())
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        DeviceAddress(address)
    }
}

/// Connection flags of a device, as last reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    /// The device these flags belong to
    pub address: DeviceAddress,
    /// Set to true if the device accepts connections
    pub is_connectable: bool,
    /// Set to true while the device is connected
    pub is_connected: bool,
    /// Set to true while a connection is being established
    pub is_connecting: bool,
}

impl DeviceStatus {
    /// A connectable, disconnected device
    pub fn new(address: impl Into<DeviceAddress>) -> Self {
        DeviceStatus {
            address: address.into(),
            is_connectable: true,
            is_connected: false,
            is_connecting: false,
        }
    }
}

/// What the transport knows about a device when it is opened
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Current connection flags
    pub status: DeviceStatus,
    /// Advertised GATT service UUIDs
    pub services: Vec<Uuid>,
}

/// Identifies a GATT service reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceId {
    /// The device providing the service
    pub device: DeviceAddress,
    /// The type of the service
    pub uuid: Uuid,
}

/// Notifications delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BluetoothEvent {
    /// The connection flags of a device changed
    DeviceChanged(DeviceStatus),
    /// A service was discovered on a device
    ServiceAdded(ServiceId),
    /// A service on a device was updated
    ServiceChanged(ServiceId),
    /// A service disappeared from a device
    ServiceRemoved(ServiceId),
}

impl BluetoothEvent {
    /// The device this event concerns
    pub fn address(&self) -> &DeviceAddress {
        match self {
            BluetoothEvent::DeviceChanged(status) => &status.address,
            BluetoothEvent::ServiceAdded(id)
            | BluetoothEvent::ServiceChanged(id)
            | BluetoothEvent::ServiceRemoved(id) => &id.device,
        }
    }
}
