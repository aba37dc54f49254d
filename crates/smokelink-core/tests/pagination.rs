mod common;

use common::{FakeRemote, Harness};
use pretty_assertions::assert_eq;
use smokelink_core::protocol::batch::{
    decode_name, Batch, BatchHeader, InventoryEntry, NAME_LEN,
};
use smokelink_core::protocol::{
    fetch_discovered, fetch_inventory, Command, FetchError, LinkError, MacAddress, Packet,
    Request, Status,
};

fn device(index: u8, name: &str) -> InventoryEntry {
    InventoryEntry {
        index,
        channel: 1 + index,
        mac: MacAddress([0x24, 0x6F, 0x28, 0x00, 0x00, index]),
        name: name.to_string(),
    }
}

/// Serve inventory pages of at most `page_size` entries; returns requested indexes
async fn serve_inventory(
    remote: &mut FakeRemote,
    devices: &[InventoryEntry],
    page_size: usize,
    active: u8,
) -> Vec<u8> {
    let mut requested = Vec::new();
    loop {
        let (_, request) = remote.next_request().await;
        assert_eq!(request.command, Command::GetDeviceInventory);
        let start = request.data()[0];
        requested.push(start);

        let page: Vec<InventoryEntry> = devices
            .iter()
            .skip(start as usize)
            .take(page_size)
            .cloned()
            .collect();
        let batch = Batch {
            header: BatchHeader {
                total_count: devices.len() as u8,
                batch_start: start,
                batch_count: page.len() as u8,
                extra: active,
            },
            entries: page,
        };
        let last = batch.is_final();
        remote.respond(&request, Status::Ok, &batch.encode()).await;
        if last {
            return requested;
        }
    }
}

#[tokio::test]
async fn test_inventory_across_pages() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let devices: Vec<InventoryEntry> = ["Stage", "Bar", "Lobby", "Dance", "Exit"]
        .iter()
        .enumerate()
        .map(|(i, name)| device(i as u8, name))
        .collect();

    let (inventory, requested) = tokio::join!(
        fetch_inventory(&harness.client),
        serve_inventory(&mut remote, &devices, 4, 3)
    );
    let inventory = inventory.unwrap();

    assert_eq!(requested, vec![0, 4]);
    assert_eq!(inventory.round_trips, 2);
    assert_eq!(inventory.total_count, 5);
    assert_eq!(inventory.entries, devices);
    assert_eq!(inventory.active_entry().map(|e| e.name.as_str()), Some("Dance"));
    assert_eq!(
        inventory.entries[0].to_string(),
        "#0 Stage ch1 24:6F:28:00:00:00"
    );
}

#[tokio::test]
async fn test_empty_discovery_takes_one_round_trip() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let (discovery, ()) = tokio::join!(fetch_discovered(&harness.client), async {
        let (_, request) = remote.next_request().await;
        assert_eq!(request.command, Command::GetDiscoveredDevices);
        assert_eq!(request.data(), &[0]);
        remote.respond(&request, Status::Ok, &[0, 0, 0, 0]).await;
    });
    let discovery = discovery.unwrap();

    assert_eq!(discovery.round_trips, 1);
    assert!(discovery.entries.is_empty());
    assert_eq!(discovery.paired().count(), 0);
}

#[tokio::test]
async fn test_malformed_page_aborts_fetch() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let (result, ()) = tokio::join!(fetch_inventory(&harness.client), async {
        let (_, request) = remote.next_request().await;
        // Claims two entries but carries one
        let mut data = vec![2, 0, 2, 0];
        data.extend_from_slice(&[0u8; 20]);
        remote.respond(&request, Status::Ok, &data).await;
    });

    assert!(matches!(result, Err(FetchError::Malformed(_))));
}

#[tokio::test]
async fn test_device_status_aborts_fetch() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let (result, ()) = tokio::join!(fetch_discovered(&harness.client), async {
        let (_, request) = remote.next_request().await;
        remote.respond(&request, Status::NotReady, &[]).await;
    });

    assert!(matches!(result, Err(FetchError::Device(Status::NotReady))));
}

#[tokio::test]
async fn test_fetch_requires_connection() {
    let harness = Harness::new();
    let result = fetch_inventory(&harness.client).await;
    assert!(matches!(
        result,
        Err(FetchError::Link(LinkError::NotConnected))
    ));
}

async fn rename_on_wire(name: &str) -> (u8, String, [u8; NAME_LEN]) {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let request = Request::RenameDevice {
        paired_index: 1,
        name: name.to_string(),
    };

    let (response, on_wire): (_, Packet) = tokio::join!(harness.client.request(&request), async {
        let (_, packet) = remote.next_request().await;
        remote.respond(&packet, Status::Ok, &[]).await;
        packet
    });
    response.unwrap();

    assert_eq!(on_wire.command, Command::RenameDevice);
    let data = on_wire.data();
    assert_eq!(data.len(), 1 + NAME_LEN);
    let mut field = [0u8; NAME_LEN];
    field.copy_from_slice(&data[1..]);
    (data[0], decode_name(&field), field)
}

#[tokio::test]
async fn test_rename_name_round_trip() {
    let (index, name, field) = rename_on_wire("Timer-A").await;
    assert_eq!(index, 1);
    assert_eq!(name, "Timer-A");
    assert_eq!(&field[7..], &[0, 0, 0]);
}

#[tokio::test]
async fn test_rename_truncates_long_name() {
    let (_, name, _) = rename_on_wire("Main Stage Left").await;
    assert_eq!(name, "Main Stage");
}
