//! Interfaces to the underlying Bluetooth transport.
//!
//! Blegate does not talk to a radio itself. An application plugs in a backend implementing [`AdapterGate`] and
//! [`Central`], and feeds the transport's notifications into [`Adapter::handle_event`][crate::Adapter::handle_event].

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ErrorKind;
use crate::state::Waiters;
use crate::{AdapterEvent, DeviceAddress, Error, Result};

/// Access to the power state of the Bluetooth adapter.
#[async_trait]
pub trait AdapterGate: Send + Sync {
    /// Asynchronously blocks until the radio is powered on.
    ///
    /// May be called repeatedly and concurrently. Returns immediately if the radio is already on.
    async fn wait_powered_on(&self) -> Result<()>;
}

/// Fire-and-forget requests issued to the transport on behalf of a device.
///
/// Neither request reports its outcome to the device. Progress is only observed through the
/// [`BluetoothEvent`][crate::BluetoothEvent]s subsequently delivered by the transport. An `Err` means the request
/// could not be issued at all; it is logged and otherwise ignored.
pub trait Central: Send + Sync {
    /// Request a connection to the device at `address`.
    fn connect(&self, address: &DeviceAddress) -> Result<()>;

    /// Request enumeration of the primary services of the device at `address`.
    fn list_services(&self, address: &DeviceAddress) -> Result<()>;
}

/// An [`AdapterGate`] driven by the transport's [`AdapterEvent`]s.
///
/// Feed it every power state change with [`PowerGate::update`]; waiters are released when the adapter becomes
/// available.
pub struct PowerGate {
    state: Mutex<PowerState>,
}

struct PowerState {
    powered_on: bool,
    waiters: Waiters<()>,
}

impl PowerGate {
    /// Creates a gate with the current power state of the adapter
    pub fn new(powered_on: bool) -> Self {
        PowerGate {
            state: Mutex::new(PowerState {
                powered_on,
                waiters: Waiters::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the adapter is currently powered on
    pub fn is_powered_on(&self) -> bool {
        self.state().powered_on
    }

    /// Records a power state change reported by the transport
    pub fn update(&self, event: AdapterEvent) {
        let mut state = self.state();
        state.powered_on = event == AdapterEvent::Available;
        debug!("adapter is now {:?}", event);
        if state.powered_on {
            state.waiters.wake_all(());
        }
    }
}

impl std::fmt::Debug for PowerGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerGate")
            .field("powered_on", &self.is_powered_on())
            .finish()
    }
}

#[async_trait]
impl AdapterGate for PowerGate {
    async fn wait_powered_on(&self) -> Result<()> {
        let receiver = {
            let mut state = self.state();
            if state.powered_on {
                return Ok(());
            }
            state.waiters.prune();
            state.waiters.push()
        };

        receiver
            .await
            .map_err(|_| Error::new(ErrorKind::Internal, None, "power gate dropped"))
    }
}
