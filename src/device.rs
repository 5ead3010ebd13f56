use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_lite::FutureExt;
use futures_timer::Delay;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::state::{ConnectStep, DeviceState, ServiceStep};
use crate::{AdapterGate, BluetoothEvent, Central, DeviceAddress, DeviceInfo, Error, Result, Service};

/// A Bluetooth LE peripheral and its connection state
///
/// Obtained from [`Adapter::open_device`][crate::Adapter::open_device]. Clones refer to the same device.
#[derive(Clone)]
pub struct Device(pub(crate) Arc<DeviceInner>);

pub(crate) struct DeviceInner {
    address: DeviceAddress,
    state: Mutex<DeviceState>,
    gate: Arc<dyn AdapterGate>,
    central: Arc<dyn Central>,
}

impl DeviceInner {
    pub(crate) fn new(info: DeviceInfo, gate: Arc<dyn AdapterGate>, central: Arc<dyn Central>) -> Self {
        DeviceInner {
            address: info.status.address.clone(),
            state: Mutex::new(DeviceState::new(info, Service::UUID)),
            gate,
            central,
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a transport notification. Events for other devices or services are ignored.
    pub(crate) fn handle_event(&self, event: &BluetoothEvent) -> bool {
        let mut state = self.state();
        match event {
            BluetoothEvent::DeviceChanged(status) => state.device_changed(status),
            BluetoothEvent::ServiceAdded(id) => state.service_added(id),
            BluetoothEvent::ServiceChanged(id) => state.service_changed(id),
            BluetoothEvent::ServiceRemoved(id) => state.service_removed(id),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state();
        f.debug_struct("Device")
            .field("address", &self.0.address)
            .field("connectable", &state.is_connectable())
            .field("connected", &state.is_connected())
            .field("connecting", &state.is_connecting())
            .field("service", &state.service())
            .field("connect_waiters", &state.pending_connect_waiters())
            .field("service_waiters", &state.pending_service_waiters())
            .finish()
    }
}

impl std::fmt::Display for Device {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0.address, f)
    }
}

impl Device {
    /// This device's address
    #[inline]
    pub fn address(&self) -> &DeviceAddress {
        &self.0.address
    }

    /// Whether this device advertises the FIDO U2F service.
    ///
    /// Based on the advertisement data the device was opened with; does not require a connection.
    pub fn has_service(&self) -> bool {
        self.0.state().has_service()
    }

    /// Whether the device accepts connections, as last reported by the transport
    pub fn is_connectable(&self) -> bool {
        self.0.state().is_connectable()
    }

    /// The connection status for this device, as last reported by the transport
    pub fn is_connected(&self) -> bool {
        self.0.state().is_connected()
    }

    /// Whether a connection is being established, as last reported by the transport
    pub fn is_connecting(&self) -> bool {
        self.0.state().is_connecting()
    }

    /// The discovered FIDO U2F service, if it is currently known
    pub fn service(&self) -> Option<Service> {
        self.0.state().service().cloned()
    }

    /// Asynchronously blocks until the device is connected.
    ///
    /// Waits for the adapter to be powered on first. If the device is not connected, a connect request is issued
    /// unless the device is not connectable or a request is already outstanding; concurrent callers share a single
    /// request and are released together, in the order they started waiting, once the transport reports the
    /// connection.
    ///
    /// A failed connect request does not fail this wait, and it is not retried for waiters already queued. This only
    /// returns an error if the adapter gate fails.
    pub async fn wait_connected(&self) -> Result<()> {
        self.0.gate.wait_powered_on().await?;

        let step = self.0.state().request_connection();
        let receiver = match step {
            ConnectStep::Connected => return Ok(()),
            ConnectStep::Wait { receiver, connect } => {
                if connect {
                    debug!("connecting to {}", self.0.address);
                    if let Err(err) = self.0.central.connect(&self.0.address) {
                        warn!("error connecting to {}: {}", self.0.address, err);
                        self.0.state().connect_failed();
                    }
                }
                receiver
            }
        };

        receiver.await.map_err(|_| waiter_dropped(&self.0.address))
    }

    /// Asynchronously blocks until the FIDO U2F service of the device is discovered.
    ///
    /// Waits for [`wait_connected`][Self::wait_connected] first. If the service is already known it is returned
    /// immediately; otherwise a service enumeration is requested and the call waits for the transport to report the
    /// service.
    pub async fn wait_service_ready(&self) -> Result<Service> {
        self.wait_connected().await?;

        let step = self.0.state().request_service();
        let receiver = match step {
            ServiceStep::Ready(service) => return Ok(service),
            ServiceStep::Wait(receiver) => {
                // The enumeration result itself is not used: the service is only usable once it has been reported
                // through a service event.
                if let Err(err) = self.0.central.list_services(&self.0.address) {
                    warn!("error listing services of {}: {}", self.0.address, err);
                }
                receiver
            }
        };

        receiver.await.map_err(|_| waiter_dropped(&self.0.address))
    }

    /// Like [`wait_connected`][Self::wait_connected], but fails with [`ErrorKind::Timeout`] if the device is not
    /// connected within `timeout`.
    ///
    /// Timing out does not cancel the outstanding connect request, and later calls do not issue another one until the
    /// transport reports the device as connecting or connected.
    pub async fn wait_connected_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_connected().or(timed_out(timeout)).await
    }

    /// Like [`wait_service_ready`][Self::wait_service_ready], but fails with [`ErrorKind::Timeout`] if the service
    /// is not discovered within `timeout`.
    pub async fn wait_service_ready_timeout(&self, timeout: Duration) -> Result<Service> {
        self.wait_service_ready().or(timed_out(timeout)).await
    }
}

async fn timed_out<T>(timeout: Duration) -> Result<T> {
    Delay::new(timeout).await;
    Err(ErrorKind::Timeout.into())
}

fn waiter_dropped(address: &DeviceAddress) -> Error {
    Error::new(
        ErrorKind::Internal,
        None,
        format!("waiter for {address} dropped without completion"),
    )
}
