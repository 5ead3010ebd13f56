use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

use crate::device::DeviceInner;
use crate::{BluetoothEvent, DeviceAddress};

/// Routes transport notifications to the device registered for their address.
///
/// Holds weak references only; a device that has been dropped by every user stops receiving events and its entry is
/// removed on the next lookup or registration.
#[derive(Default)]
pub(crate) struct Dispatcher {
    devices: Mutex<HashMap<DeviceAddress, Weak<DeviceInner>>>,
}

impl Dispatcher {
    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceAddress, Weak<DeviceInner>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live device registered for `address`, or registers the one built by `create`.
    pub fn get_or_register(
        &self,
        address: &DeviceAddress,
        create: impl FnOnce() -> DeviceInner,
    ) -> Arc<DeviceInner> {
        let mut devices = self.devices();
        if let Some(device) = devices.get(address).and_then(Weak::upgrade) {
            return device;
        }

        devices.retain(|_, device| device.strong_count() > 0);
        let device = Arc::new(create());
        devices.insert(address.clone(), Arc::downgrade(&device));
        device
    }

    pub fn lookup(&self, address: &DeviceAddress) -> Option<Arc<DeviceInner>> {
        let mut devices = self.devices();
        let device = devices.get(address)?.upgrade();
        if device.is_none() {
            devices.remove(address);
        }
        device
    }

    /// Delivers `event` to its device. Returns `true` if the device's state was affected.
    pub fn dispatch(&self, event: &BluetoothEvent) -> bool {
        // Don't hold the registry lock while the device handles the event
        match self.lookup(event.address()) {
            Some(device) => device.handle_event(event),
            None => {
                trace!("ignoring event for unknown device {}: {:?}", event.address(), event);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        let mut devices = self.devices();
        devices.retain(|_, device| device.strong_count() > 0);
        devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Central, DeviceInfo, DeviceStatus, PowerGate, Result};

    struct IdleCentral;

    impl Central for IdleCentral {
        fn connect(&self, _address: &DeviceAddress) -> Result<()> {
            Ok(())
        }

        fn list_services(&self, _address: &DeviceAddress) -> Result<()> {
            Ok(())
        }
    }

    fn device(address: &DeviceAddress) -> DeviceInner {
        let info = DeviceInfo {
            status: DeviceStatus::new(address.clone()),
            services: Vec::new(),
        };
        DeviceInner::new(info, Arc::new(PowerGate::new(true)), Arc::new(IdleCentral))
    }

    #[test]
    fn registration_drops_dead_entries() {
        let dispatcher = Dispatcher::default();
        let first = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let second = DeviceAddress::from("11:22:33:44:55:66");

        drop(dispatcher.get_or_register(&first, || device(&first)));
        assert_eq!(dispatcher.devices().len(), 1);

        let live = dispatcher.get_or_register(&second, || device(&second));
        let devices = dispatcher.devices();
        assert_eq!(devices.len(), 1);
        assert!(devices.contains_key(&second));
        drop(devices);

        assert!(Arc::ptr_eq(&live, &dispatcher.get_or_register(&second, || device(&second))));
    }
}
