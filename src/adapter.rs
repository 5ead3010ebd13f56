use std::sync::Arc;

use futures_core::Stream;
use futures_lite::StreamExt;
use tracing::{debug, info};

use crate::device::DeviceInner;
use crate::dispatch::Dispatcher;
use crate::{AdapterGate, BluetoothEvent, Central, Device, DeviceAddress, DeviceInfo, Result};

/// The Bluetooth transport shared by all devices
///
/// An `Adapter` wraps the application's backend and routes the backend's [`BluetoothEvent`]s to the [`Device`]s
/// opened through it. Clones refer to the same adapter.
#[derive(Clone)]
pub struct Adapter(Arc<AdapterInner>);

struct AdapterInner {
    gate: Arc<dyn AdapterGate>,
    central: Arc<dyn Central>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("devices", &self.0.dispatcher.len())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Adapter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Adapter {}

impl Adapter {
    /// Creates an adapter for a backend implementing both transport interfaces
    pub fn new<B: AdapterGate + Central + 'static>(backend: B) -> Self {
        let backend = Arc::new(backend);
        Self::from_parts(backend.clone(), backend)
    }

    /// Creates an adapter from separate power gate and transport implementations
    pub fn from_parts(gate: Arc<dyn AdapterGate>, central: Arc<dyn Central>) -> Self {
        Adapter(Arc::new(AdapterInner {
            gate,
            central,
            dispatcher: Dispatcher::default(),
        }))
    }

    /// Asynchronously blocks until the adapter is powered on
    #[inline]
    pub async fn wait_available(&self) -> Result<()> {
        self.0.gate.wait_powered_on().await
    }

    /// Opens the device described by `info`.
    ///
    /// There is one state machine per address: if a device with the same address is already open, that device is
    /// returned and `info` is ignored.
    pub fn open_device(&self, info: DeviceInfo) -> Device {
        let address = info.status.address.clone();
        let inner = self.0.dispatcher.get_or_register(&address, || {
            debug!("opening device {}", address);
            DeviceInner::new(info, self.0.gate.clone(), self.0.central.clone())
        });
        Device(inner)
    }

    /// Returns the open device with the given address, if any
    pub fn device(&self, address: &DeviceAddress) -> Option<Device> {
        self.0.dispatcher.lookup(address).map(Device)
    }

    /// Delivers a transport notification to the device it concerns.
    ///
    /// Returns `true` if the state of an open device was affected.
    pub fn handle_event(&self, event: &BluetoothEvent) -> bool {
        self.0.dispatcher.dispatch(event)
    }

    /// Delivers every notification from `events` until the stream ends.
    pub async fn process_events<S>(&self, mut events: S)
    where
        S: Stream<Item = BluetoothEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.handle_event(&event);
        }
        info!("transport event stream closed");
    }
}
