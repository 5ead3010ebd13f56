use std::time::Duration;

use blegate::*;

fn assert_send<T: Send>(t: T) -> T {
    t
}

fn assert_send_sync<T: Send + Sync>() {}

async fn check_adapter_apis(adapter: Adapter) -> Result<Device> {
    let _available: Result<()> = assert_send(adapter.wait_available()).await;

    let device: Device = adapter.open_device(DeviceInfo {
        status: DeviceStatus::new("AB:CD:EF:01:23:45"),
        services: vec![Service::UUID],
    });
    let _same: Option<Device> = adapter.device(device.address());

    let event = BluetoothEvent::DeviceChanged(DeviceStatus::new("AB:CD:EF:01:23:45"));
    let _address: &DeviceAddress = event.address();
    let _handled: bool = adapter.handle_event(&event);
    let () = assert_send(adapter.process_events(futures_lite::stream::iter(vec![event]))).await;

    Ok(device)
}

async fn check_device_apis(device: Device) -> Result<Service> {
    let _address: &DeviceAddress = device.address();
    let _has_service: bool = device.has_service();
    let _connectable: bool = device.is_connectable();
    let _connected: bool = device.is_connected();
    let _connecting: bool = device.is_connecting();
    let _service: Option<Service> = device.service();

    let _res: Result<()> = assert_send(device.wait_connected()).await;
    let _res: Result<()> = assert_send(device.wait_connected_timeout(Duration::from_secs(1))).await;
    let _service: Result<Service> = assert_send(device.wait_service_ready_timeout(Duration::from_secs(1))).await;
    assert_send(device.wait_service_ready()).await
}

fn check_service_apis(service: Service) {
    let _id: &ServiceId = service.id();
    let _address: &DeviceAddress = service.device_address();
    let _uuid: Uuid = service.uuid();
    let _valid: bool = service.is_valid();
}

#[allow(unused)]
async fn check_apis(adapter: Adapter) -> Result<()> {
    assert_send_sync::<Adapter>();
    assert_send_sync::<Device>();
    assert_send_sync::<Service>();
    assert_send_sync::<PowerGate>();

    let gate = PowerGate::new(true);
    let _powered: bool = gate.is_powered_on();
    gate.update(AdapterEvent::Available);
    let _res: Result<()> = assert_send(gate.wait_powered_on()).await;

    let device = check_adapter_apis(adapter).await?;
    let service = check_device_apis(device).await?;
    check_service_apis(service);

    Ok(())
}

fn main() {}
