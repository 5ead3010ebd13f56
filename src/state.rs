//! Connection and service-discovery state for a single device.
//!
//! [`DeviceState`] performs no I/O. Requests return what the caller should wait on and whether a transport request
//! must be issued; event handlers update the state and complete waiters.

use std::collections::VecDeque;

use futures_channel::oneshot;
use tracing::{debug, info, trace};

use crate::{DeviceAddress, DeviceInfo, DeviceStatus, Service, ServiceId, Uuid};

/// FIFO queue of pending waiters for one milestone.
pub(crate) struct Waiters<T> {
    queue: VecDeque<oneshot::Sender<T>>,
}

impl<T: Clone> Waiters<T> {
    pub fn new() -> Self {
        Waiters { queue: VecDeque::new() }
    }

    /// Enqueues a new waiter at the back of the queue.
    pub fn push(&mut self) -> oneshot::Receiver<T> {
        let (sender, receiver) = oneshot::channel();
        self.queue.push_back(sender);
        receiver
    }

    /// Drops waiters whose receiving end has gone away.
    pub fn prune(&mut self) {
        self.queue.retain(|sender| !sender.is_canceled());
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Completes every queued waiter, front to back, and empties the queue.
    ///
    /// Returns the number of waiters that were still listening.
    pub fn wake_all(&mut self, value: T) -> usize {
        let mut woken = 0;
        while let Some(sender) = self.queue.pop_front() {
            if sender.send(value.clone()).is_ok() {
                woken += 1;
            }
        }
        woken
    }
}

/// Result of asking for the `connected` milestone.
pub(crate) enum ConnectStep {
    Connected,
    Wait {
        receiver: oneshot::Receiver<()>,
        /// A connect request must be issued for this waiter.
        connect: bool,
    },
}

/// Result of asking for the `service ready` milestone.
pub(crate) enum ServiceStep {
    Ready(Service),
    Wait(oneshot::Receiver<Service>),
}

pub(crate) struct DeviceState {
    address: DeviceAddress,
    advertised: Vec<Uuid>,
    target: Uuid,
    connectable: bool,
    connected: bool,
    connecting: bool,
    /// A connect request went out and the transport has not yet reported on it.
    connect_requested: bool,
    service: Option<Service>,
    connect_waiters: Waiters<()>,
    service_waiters: Waiters<Service>,
}

impl DeviceState {
    pub fn new(info: DeviceInfo, target: Uuid) -> Self {
        let DeviceInfo { status, services } = info;
        DeviceState {
            address: status.address,
            advertised: services,
            target,
            connectable: status.is_connectable,
            connected: status.is_connected,
            connecting: status.is_connecting,
            connect_requested: false,
            service: None,
            connect_waiters: Waiters::new(),
            service_waiters: Waiters::new(),
        }
    }

    /// Whether the advertised service list includes the target service.
    pub fn has_service(&self) -> bool {
        self.advertised.contains(&self.target)
    }

    pub fn is_connectable(&self) -> bool {
        self.connectable
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    pub fn pending_connect_waiters(&self) -> usize {
        self.connect_waiters.len()
    }

    pub fn pending_service_waiters(&self) -> usize {
        self.service_waiters.len()
    }

    /// Registers interest in the `connected` milestone.
    ///
    /// At most one connect request is outstanding: one is asked for only when the device is connectable, does not
    /// report a connection in progress, no earlier request is awaiting a report from the transport, and no earlier
    /// waiter is still queued. Waiters that went away do not release a request already issued for them.
    pub fn request_connection(&mut self) -> ConnectStep {
        if self.connected {
            return ConnectStep::Connected;
        }

        self.connect_waiters.prune();
        let connect =
            self.connectable && !self.connecting && !self.connect_requested && self.connect_waiters.is_empty();
        if connect {
            self.connect_requested = true;
        } else if self.connect_requested {
            trace!("{}: connect request already outstanding", self.address);
        }
        if !self.connectable {
            debug!("{} is not connectable, waiting for it to connect", self.address);
        }

        ConnectStep::Wait {
            receiver: self.connect_waiters.push(),
            connect,
        }
    }

    /// Records that the transport refused the outstanding connect request, so a later waiter may issue a new one.
    ///
    /// Waiters already queued are left pending.
    pub fn connect_failed(&mut self) {
        self.connect_requested = false;
    }

    /// Registers interest in the `service ready` milestone.
    pub fn request_service(&mut self) -> ServiceStep {
        if let Some(service) = &self.service {
            return ServiceStep::Ready(service.clone());
        }

        self.service_waiters.prune();
        ServiceStep::Wait(self.service_waiters.push())
    }

    /// Handles a device-changed notification. Returns `false` if the event is for another device.
    pub fn device_changed(&mut self, status: &DeviceStatus) -> bool {
        if status.address != self.address {
            return false;
        }

        self.connectable = status.is_connectable;
        self.connected = status.is_connected;
        self.connecting = status.is_connecting;
        if self.connected || self.connecting {
            self.connect_requested = false;
        }
        trace!(
            "{}: connectable={} connected={} connecting={}",
            self.address,
            self.connectable,
            self.connected,
            self.connecting
        );

        if self.connected && !self.connect_waiters.is_empty() {
            info!("connected to {}", self.address);
            let woken = self.connect_waiters.wake_all(());
            debug!("{}: resolved {} connect waiter(s)", self.address, woken);
        }

        true
    }

    fn is_target(&self, id: &ServiceId) -> bool {
        id.device == self.address && id.uuid == self.target
    }

    /// Handles a service-added notification. Returns `false` if the event is for another device or service.
    pub fn service_added(&mut self, id: &ServiceId) -> bool {
        if !self.is_target(id) {
            return false;
        }

        let service = Service::new(id.clone());
        if let Some(previous) = self.service.replace(service.clone()) {
            debug!("{} rediscovered, replacing previous handle", previous);
            previous.invalidate();
        }

        info!("{} added", service);
        let woken = self.service_waiters.wake_all(service);
        debug!("{}: resolved {} service waiter(s)", self.address, woken);
        true
    }

    /// Handles a service-changed notification.
    ///
    /// A change for a service that is not yet known counts as its discovery, since "changed" may be delivered before
    /// or instead of "added".
    pub fn service_changed(&mut self, id: &ServiceId) -> bool {
        match &self.service {
            Some(service) => {
                if self.is_target(id) {
                    debug!("{} changed", service);
                }
                false
            }
            None => self.service_added(id),
        }
    }

    /// Handles a service-removed notification. Returns `true` if the known service was dropped.
    pub fn service_removed(&mut self, id: &ServiceId) -> bool {
        if !self.is_target(id) {
            return false;
        }

        match self.service.take() {
            Some(service) => {
                info!("{} removed", service);
                service.invalidate();
                true
            }
            None => {
                debug!("{}: removal of unknown service {}", self.address, id.uuid);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_lite::future::{block_on, poll_once};

    use super::*;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn status(address: &str, connectable: bool, connected: bool, connecting: bool) -> DeviceStatus {
        DeviceStatus {
            address: DeviceAddress::from(address),
            is_connectable: connectable,
            is_connected: connected,
            is_connecting: connecting,
        }
    }

    fn state(connected: bool) -> DeviceState {
        DeviceState::new(
            DeviceInfo {
                status: status(ADDRESS, true, connected, false),
                services: vec![Service::UUID],
            },
            Service::UUID,
        )
    }

    fn target(address: &str) -> ServiceId {
        ServiceId {
            device: DeviceAddress::from(address),
            uuid: Service::UUID,
        }
    }

    fn wait_connect(state: &mut DeviceState) -> (oneshot::Receiver<()>, bool) {
        match state.request_connection() {
            ConnectStep::Wait { receiver, connect } => (receiver, connect),
            ConnectStep::Connected => panic!("unexpectedly connected"),
        }
    }

    fn wait_service(state: &mut DeviceState) -> oneshot::Receiver<Service> {
        match state.request_service() {
            ServiceStep::Wait(receiver) => receiver,
            ServiceStep::Ready(service) => panic!("unexpectedly ready: {service}"),
        }
    }

    #[test]
    fn only_first_waiter_requests_connect() {
        let mut state = state(false);
        let (mut first, connect_first) = wait_connect(&mut state);
        let (mut second, connect_second) = wait_connect(&mut state);
        assert!(connect_first);
        assert!(!connect_second);
        assert_eq!(state.pending_connect_waiters(), 2);

        assert!(state.device_changed(&status(ADDRESS, true, true, false)));
        assert_eq!(state.pending_connect_waiters(), 0);
        assert_eq!(first.try_recv(), Ok(Some(())));
        assert_eq!(second.try_recv(), Ok(Some(())));
    }

    #[test]
    fn connected_device_resolves_immediately() {
        let mut state = state(true);
        assert!(matches!(state.request_connection(), ConnectStep::Connected));
        assert_eq!(state.pending_connect_waiters(), 0);
    }

    #[test]
    fn in_progress_connection_is_not_duplicated() {
        let mut state = state(false);
        state.device_changed(&status(ADDRESS, true, false, true));
        let (_receiver, connect) = wait_connect(&mut state);
        assert!(!connect);
    }

    #[test]
    fn unconnectable_device_queues_without_connecting() {
        let mut state = state(false);
        state.device_changed(&status(ADDRESS, false, false, false));
        let (mut receiver, connect) = wait_connect(&mut state);
        assert!(!connect);
        assert_eq!(receiver.try_recv(), Ok(None));
    }

    #[test]
    fn other_device_is_ignored() {
        let mut state = state(false);
        let (mut receiver, _) = wait_connect(&mut state);

        assert!(!state.device_changed(&status("11:22:33:44:55:66", false, true, true)));
        assert!(state.is_connectable());
        assert!(!state.is_connected());
        assert!(!state.is_connecting());
        assert_eq!(state.pending_connect_waiters(), 1);
        assert_eq!(receiver.try_recv(), Ok(None));
    }

    #[test]
    fn disconnected_update_keeps_waiters() {
        let mut state = state(false);
        let (mut receiver, _) = wait_connect(&mut state);
        state.device_changed(&status(ADDRESS, true, false, false));
        assert_eq!(state.pending_connect_waiters(), 1);
        assert_eq!(receiver.try_recv(), Ok(None));
    }

    #[test]
    fn abandoned_waiters_are_pruned() {
        let mut state = state(false);
        let (receiver, connect) = wait_connect(&mut state);
        assert!(connect);
        drop(receiver);

        let (_receiver, connect) = wait_connect(&mut state);
        assert!(!connect);
        assert_eq!(state.pending_connect_waiters(), 1);
    }

    #[test]
    fn outstanding_request_survives_abandoned_waiters() {
        let mut state = state(false);
        for _ in 0..3 {
            let (receiver, _) = wait_connect(&mut state);
            drop(receiver);
        }

        let (mut receiver, connect) = wait_connect(&mut state);
        assert!(!connect);
        assert!(state.device_changed(&status(ADDRESS, true, true, false)));
        assert_eq!(receiver.try_recv(), Ok(Some(())));
    }

    #[test]
    fn transport_report_releases_request() {
        let mut state = state(false);
        let (receiver, connect) = wait_connect(&mut state);
        assert!(connect);
        drop(receiver);

        // Connecting, then back to disconnected without ever connecting
        assert!(state.device_changed(&status(ADDRESS, true, false, true)));
        assert!(state.device_changed(&status(ADDRESS, true, false, false)));

        let (_receiver, connect) = wait_connect(&mut state);
        assert!(connect);
    }

    #[test]
    fn disconnected_report_keeps_request() {
        let mut state = state(false);
        let (receiver, connect) = wait_connect(&mut state);
        assert!(connect);
        drop(receiver);

        assert!(state.device_changed(&status(ADDRESS, true, false, false)));
        let (_receiver, connect) = wait_connect(&mut state);
        assert!(!connect);
    }

    #[test]
    fn refused_request_is_released() {
        let mut state = state(false);
        let (mut first, connect) = wait_connect(&mut state);
        assert!(connect);
        state.connect_failed();

        // The queued waiter still holds the slot
        let (second, connect) = wait_connect(&mut state);
        assert!(!connect);
        assert_eq!(first.try_recv(), Ok(None));

        drop(first);
        drop(second);
        let (_third, connect) = wait_connect(&mut state);
        assert!(connect);
    }

    #[test]
    fn service_added_resolves_waiters_with_same_handle() {
        let mut state = state(true);
        let first = wait_service(&mut state);
        let second = wait_service(&mut state);

        assert!(state.service_added(&target(ADDRESS)));
        let first = block_on(first).unwrap();
        let second = block_on(second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.device_address(), &DeviceAddress::from(ADDRESS));
        assert_eq!(first.uuid(), Service::UUID);
        assert_eq!(state.pending_service_waiters(), 0);

        match state.request_service() {
            ServiceStep::Ready(service) => assert_eq!(service, first),
            ServiceStep::Wait(_) => panic!("service should be known"),
        }
    }

    #[test]
    fn service_changed_without_known_service_acts_as_added() {
        let mut state = state(true);
        let mut receiver = wait_service(&mut state);

        assert!(state.service_changed(&target(ADDRESS)));
        let service = receiver.try_recv().unwrap().unwrap();
        assert!(service.is_valid());
        assert_eq!(state.service(), Some(&service));
    }

    #[test]
    fn service_changed_with_known_service_is_observation_only() {
        let mut state = state(true);
        state.service_added(&target(ADDRESS));
        let known = state.service().cloned().unwrap();

        assert!(!state.service_changed(&target(ADDRESS)));
        assert_eq!(state.service(), Some(&known));
        assert!(known.is_valid());
    }

    #[test]
    fn mismatched_services_are_ignored() {
        let mut state = state(true);
        let mut receiver = wait_service(&mut state);

        let other_uuid = ServiceId {
            device: DeviceAddress::from(ADDRESS),
            uuid: crate::btuuid::services::GENERIC_ACCESS,
        };
        assert!(!state.service_added(&other_uuid));
        assert!(!state.service_changed(&target("11:22:33:44:55:66")));
        assert!(state.service().is_none());
        assert_eq!(receiver.try_recv(), Ok(None));
    }

    #[test]
    fn mismatched_removals_are_ignored() {
        let mut state = state(true);
        assert!(state.service_added(&target(ADDRESS)));
        let service = state.service().cloned().unwrap();

        let other_uuid = ServiceId {
            device: DeviceAddress::from(ADDRESS),
            uuid: crate::btuuid::services::GENERIC_ACCESS,
        };
        assert!(!state.service_removed(&other_uuid));
        assert!(!state.service_removed(&target("11:22:33:44:55:66")));

        assert_eq!(state.service(), Some(&service));
        assert!(service.is_valid());
    }

    #[test]
    fn removal_invalidates_and_rearms_discovery() {
        let mut state = state(true);
        state.service_added(&target(ADDRESS));
        let service = state.service().cloned().unwrap();

        assert!(state.service_removed(&target(ADDRESS)));
        assert!(!service.is_valid());
        assert!(state.service().is_none());

        let mut receiver = wait_service(&mut state);
        assert_eq!(receiver.try_recv(), Ok(None));
        assert!(!state.service_removed(&target(ADDRESS)));
    }

    #[test]
    fn rediscovery_replaces_handle() {
        let mut state = state(true);
        state.service_added(&target(ADDRESS));
        let first = state.service().cloned().unwrap();
        state.service_added(&target(ADDRESS));
        let second = state.service().cloned().unwrap();

        assert_ne!(first, second);
        assert!(!first.is_valid());
        assert!(second.is_valid());
    }

    #[test]
    fn has_service_reflects_advertisement() {
        assert!(state(false).has_service());

        let bare = DeviceState::new(
            DeviceInfo {
                status: status(ADDRESS, true, false, false),
                services: Vec::new(),
            },
            Service::UUID,
        );
        assert!(!bare.has_service());

        let other = DeviceState::new(
            DeviceInfo {
                status: status(ADDRESS, true, false, false),
                services: vec![crate::btuuid::services::GENERIC_ATTRIBUTE],
            },
            Service::UUID,
        );
        assert!(!other.has_service());
    }

    #[test]
    fn wake_all_completes_every_waiter() {
        let mut waiters = Waiters::<u32>::new();
        let receivers: Vec<_> = (0..3).map(|_| waiters.push()).collect();
        assert_eq!(waiters.wake_all(7), 3);
        assert!(waiters.is_empty());
        for receiver in receivers {
            assert_eq!(block_on(poll_once(receiver)), Some(Ok(7)));
        }
    }
}
