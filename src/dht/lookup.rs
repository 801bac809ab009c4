//! Lookup module
//!
//! Store and fetch records by walking the ring to the owning node.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::dht::network::Network;
use crate::dht::node::Key;
use crate::error::{Result, RingError};
use crate::storage::backend::{validate_name, Location};

impl Network {
    /// Store `blob` under `key`, starting the walk at `start`.
    ///
    /// The blob is written as `name` in the owner's namespace and the key is
    /// indexed there. Storing an existing key replaces its record.
    pub async fn store(&mut self, start: &str, key: Key, blob: Bytes, name: &str) -> Result<Location> {
        validate_name(name)?;
        let route = self.locate(start, &key)?;
        let owner = self.node_by_id(&route.owner)?;
        let location = Location::new(owner.namespace(), name);

        trace!("Key {} owned by {} after {} hops", key.short(), owner.name, route.hops);

        // Blob names stay unique across the ring; leave handoffs rely on it
        if let Some((holder, other)) = self.entry_named(start, name)?.filter(|(_, e)| e.key != key) {
            return Err(RingError::validation_error_with_field(
                format!("Blob name '{}' already holds key {} on {}", name, other.key.short(), holder.name),
                "name",
            ));
        }

        self.backend.put(&location.namespace, name, blob).await?;

        let replaced = self
            .node_mut_by_id(&route.owner)?
            .index
            .insert(key, location.clone());

        if let Some(old) = replaced.filter(|old| old != &location) {
            self.backend.delete(&old.namespace, &old.name).await?;
        }

        debug!("Stored key {} as {}", key.short(), location);
        Ok(location)
    }

    /// Find where the record for `key` lives, starting the walk at `start`
    pub fn fetch(&self, start: &str, key: &Key) -> Result<Location> {
        let route = self.locate(start, key)?;
        let owner = self.node_by_id(&route.owner)?;

        trace!("Key {} owned by {} after {} hops", key.short(), owner.name, route.hops);

        owner
            .index
            .get(key)
            .cloned()
            .ok_or_else(|| RingError::key_not_found_at(key.to_hex(), owner.name.clone()))
    }

    /// Read the blob at a location
    pub async fn read(&self, location: &Location) -> Result<Bytes> {
        self.backend
            .get(&location.namespace, &location.name)
            .await?
            .ok_or_else(|| {
                RingError::storage_error_with_namespace(
                    format!("Indexed blob '{}' is missing", location.name),
                    location.namespace.clone(),
                )
            })
    }

    /// Fetch the record for `key` and read its blob
    pub async fn fetch_value(&self, start: &str, key: &Key) -> Result<Bytes> {
        let location = self.fetch(start, key)?;
        self.read(&location).await
    }
}
