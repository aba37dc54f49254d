//! Paged listing fetches
//!
//! Inventory and discovery listings arrive a few entries per response. The
//! console asks for the page starting at `next_index` until the device says
//! it is done.

use serde::Serialize;
use tracing::debug;

use super::batch::{Batch, BatchEntry, DiscoveryEntry, InventoryEntry};
use super::commands::Request;
use super::connection::LinkClient;
use super::error::FetchError;
use super::transport::Connector;

/// All entries of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing<E> {
    /// Total reported by the last page
    pub total_count: u8,
    /// Header byte 3 of the last page
    pub extra: u8,
    pub entries: Vec<E>,
    /// Requests it took
    pub round_trips: usize,
}

pub type Inventory = Listing<InventoryEntry>;
pub type Discovery = Listing<DiscoveryEntry>;

impl Inventory {
    /// Index of the device the remote currently drives
    pub fn active_index(&self) -> u8 {
        self.extra
    }

    pub fn is_active(&self, entry: &InventoryEntry) -> bool {
        entry.index == self.active_index()
    }

    pub fn active_entry(&self) -> Option<&InventoryEntry> {
        self.entries.iter().find(|e| self.is_active(e))
    }
}

impl Discovery {
    pub fn paired(&self) -> impl Iterator<Item = &DiscoveryEntry> {
        self.entries.iter().filter(|e| e.is_paired())
    }

    pub fn unpaired(&self) -> impl Iterator<Item = &DiscoveryEntry> {
        self.entries.iter().filter(|e| !e.is_paired())
    }
}

/// Fetch the paired device inventory
pub async fn fetch_inventory<C: Connector>(
    client: &LinkClient<C>,
) -> Result<Inventory, FetchError> {
    fetch_all(client, |next_index| Request::GetDeviceInventory { next_index }).await
}

/// Fetch the devices found by the running (or last) discovery scan
pub async fn fetch_discovered<C: Connector>(
    client: &LinkClient<C>,
) -> Result<Discovery, FetchError> {
    fetch_all(client, |next_index| Request::GetDiscoveredDevices { next_index }).await
}

async fn fetch_all<C, E, F>(client: &LinkClient<C>, page: F) -> Result<Listing<E>, FetchError>
where
    C: Connector,
    E: BatchEntry,
    F: Fn(u8) -> Request,
{
    let mut listing = Listing {
        total_count: 0,
        extra: 0,
        entries: Vec::new(),
        round_trips: 0,
    };
    let mut next_index = 0u8;

    loop {
        let response = client.request(&page(next_index)).await?;
        listing.round_trips += 1;
        if !response.status.is_ok() {
            return Err(FetchError::Device(response.status));
        }

        let batch = Batch::<E>::parse(response.data())?;
        debug!(
            kind = E::KIND,
            total = batch.header.total_count,
            start = batch.header.batch_start,
            count = batch.header.batch_count,
            "listing page"
        );

        listing.total_count = batch.header.total_count;
        listing.extra = batch.header.extra;
        let done = batch.is_final();
        let following = batch.next_index();
        listing.entries.extend(batch.entries);

        if done {
            return Ok(listing);
        }
        if following <= next_index {
            return Err(FetchError::NoProgress(next_index));
        }
        next_index = following;
    }
}
