use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::btuuid::{self, BluetoothUuidExt};
use crate::{DeviceAddress, ServiceId, Uuid};

/// A discovered instance of the target GATT service on a [`Device`][crate::Device]
///
/// A `Service` is a token identifying the service to code that performs characteristic access. It is created by the
/// device when the transport reports the service, and invalidated when the transport reports it removed. Clones of a
/// `Service` refer to the same discovered instance.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    id: ServiceId,
    valid: AtomicBool,
}

impl Service {
    /// The [`Uuid`] of the service blegate looks for: the FIDO U2F service.
    pub const UUID: Uuid = btuuid::services::FIDO;

    pub(crate) fn new(id: ServiceId) -> Self {
        Service {
            inner: Arc::new(ServiceInner {
                id,
                valid: AtomicBool::new(true),
            }),
        }
    }

    /// The device address and UUID this service was discovered with
    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.inner.id
    }

    /// The address of the device providing this service
    #[inline]
    pub fn device_address(&self) -> &DeviceAddress {
        &self.inner.id.device
    }

    /// The [`Uuid`] identifying the type of this GATT service
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.inner.id.uuid
    }

    /// Whether the device still knows this service.
    ///
    /// Returns `false` once the service has been removed from the device or superseded by a newer discovery of the
    /// same service.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Service {}

impl std::hash::Hash for Service {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("device", &self.inner.id.device)
            .field("uuid", &self.inner.id.uuid)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.uuid().try_to_u16() {
            Some(short) => write!(f, "service {:#06x} on {}", short, self.device_address()),
            None => write!(f, "service {} on {}", self.uuid(), self.device_address()),
        }
    }
}
