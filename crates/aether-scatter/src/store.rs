//! Publication of finished tables to the per-frame sampler.
//!
//! A regeneration builds a complete new table set, then swaps it in with one
//! pointer store. Frames take an `Arc` snapshot when they start, so a frame
//! in flight keeps reading the set it started with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::params::GenerationSettings;

/// The three persistent tables.
#[derive(Debug, Clone)]
pub struct GeneratedTables<T> {
    pub transmittance: T,
    pub irradiance: T,
    pub inscatter: T,
}

/// A published table set and the settings it was generated with.
#[derive(Debug)]
pub struct PublishedTables<T> {
    pub tables: GeneratedTables<T>,
    pub settings: GenerationSettings,
    /// Monotonic publication counter, starting at 1.
    pub generation: u64,
}

/// Holder of the current table set.
#[derive(Debug)]
pub struct TableStore<T> {
    current: RwLock<Option<Arc<PublishedTables<T>>>>,
    generation: AtomicU64,
}

impl<T> Default for TableStore<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> TableStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tables` the current set. Returns its generation number.
    pub fn publish(&self, tables: GeneratedTables<T>, settings: GenerationSettings) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let published = Arc::new(PublishedTables {
            tables,
            settings,
            generation,
        });
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(published);
        info!(
            generation,
            replaced = previous.is_some(),
            "published atmosphere tables"
        );
        generation
    }

    /// Current table set, if one has been published and not withdrawn.
    pub fn snapshot(&self) -> Option<Arc<PublishedTables<T>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop exposing any table set. Frames holding a snapshot keep it.
    pub fn withdraw(&self) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Generation of the most recent publication, 0 if none.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PhysicalParameters;

    fn settings() -> GenerationSettings {
        GenerationSettings::new(PhysicalParameters::earth(), 0.25, 4).unwrap()
    }

    fn tables(tag: u32) -> GeneratedTables<u32> {
        GeneratedTables {
            transmittance: tag,
            irradiance: tag,
            inscatter: tag,
        }
    }

    #[test]
    fn test_empty_store_exposes_nothing() {
        let store: TableStore<u32> = TableStore::new();
        assert!(store.snapshot().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_publish_swaps_and_keeps_old_snapshot_alive() {
        let store = TableStore::new();
        assert_eq!(store.publish(tables(1), settings()), 1);
        let in_flight = store.snapshot().unwrap();

        assert_eq!(store.publish(tables(2), settings()), 2);
        let next = store.snapshot().unwrap();

        assert_eq!(in_flight.tables.inscatter, 1, "old frame keeps its tables");
        assert_eq!(next.tables.inscatter, 2);
        assert_eq!(next.generation, 2);
    }

    #[test]
    fn test_withdraw_hides_tables() {
        let store = TableStore::new();
        store.publish(tables(1), settings());
        store.withdraw();
        assert!(store.snapshot().is_none());
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_complete_sets() {
        let store = Arc::new(TableStore::new());
        store.publish(tables(0), settings());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snap = store.snapshot().unwrap();
                        let t = &snap.tables;
                        assert_eq!(t.transmittance, t.inscatter);
                        assert_eq!(t.irradiance, t.inscatter);
                    }
                })
            })
            .collect();

        for i in 1..50 {
            store.publish(tables(i), settings());
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.generation(), 50);
    }
}
