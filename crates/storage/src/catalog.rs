use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use mfq_common::{MfqError, Result};

use crate::handle::DatasetHandle;

#[derive(Debug, Default)]
struct Entries {
    handles: HashMap<String, DatasetHandle>,
    /// Names held by a creation whose data is still being written.
    reserved: HashSet<String>,
}

impl Entries {
    fn taken(&self, name: &str) -> bool {
        self.handles.contains_key(name) || self.reserved.contains(name)
    }
}

/// Name → handle mapping owned by a session context.
///
/// Reads are concurrent; creation is serialized by the write lock and a second
/// registration under the same name is rejected. A creator that writes data
/// before registering takes a [`NameReservation`] first, so no two writers
/// ever target the same name.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    entries: RwLock<Entries>,
}

/// Exclusive claim on a dataset name, released on drop unless committed.
#[derive(Debug)]
pub struct NameReservation<'a> {
    registry: &'a DatasetRegistry,
    name: String,
    committed: bool,
}

impl NameReservation<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish `handle` under the reserved name.
    pub fn commit(mut self, handle: DatasetHandle) -> Result<()> {
        if handle.name() != self.name {
            return Err(MfqError::Execution(format!(
                "handle '{}' committed under reservation '{}'",
                handle.name(),
                self.name
            )));
        }
        let mut entries = self
            .registry
            .entries
            .write()
            .expect("registry lock poisoned");
        entries.reserved.remove(&self.name);
        entries.handles.insert(self.name.clone(), handle);
        self.committed = true;
        Ok(())
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Ok(mut entries) = self.registry.entries.write() {
            entries.reserved.remove(&self.name);
        }
    }
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for a creation in progress.
    pub fn reserve(&self, name: &str) -> Result<NameReservation<'_>> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.taken(name) {
            return Err(MfqError::Conflict(name.to_string()));
        }
        entries.reserved.insert(name.to_string());
        Ok(NameReservation {
            registry: self,
            name: name.to_string(),
            committed: false,
        })
    }

    pub fn register(&self, handle: DatasetHandle) -> Result<()> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.taken(handle.name()) {
            return Err(MfqError::Conflict(handle.name().to_string()));
        }
        entries.handles.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<DatasetHandle> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .handles
            .get(name)
            .cloned()
            .ok_or_else(|| MfqError::UnknownDataset(name.to_string()))
    }

    /// Registered or reserved.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .taken(name)
    }

    pub fn deregister(&self, name: &str) -> Option<DatasetHandle> {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .handles
            .remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .handles
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use arrow_schema::Schema;
    use mfq_common::MfqError;

    use super::DatasetRegistry;
    use crate::handle::{DatasetHandle, Layout};

    fn handle(name: &str) -> DatasetHandle {
        DatasetHandle::new(name, Arc::new(Schema::empty()), 0, Layout::Unpartitioned)
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let reg = DatasetRegistry::new();
        reg.register(handle("matches")).expect("first");
        let err = reg.register(handle("matches")).expect_err("second");
        assert!(matches!(err, MfqError::Conflict(name) if name == "matches"));
    }

    #[test]
    fn concurrent_creation_admits_exactly_one() {
        let reg = Arc::new(DatasetRegistry::new());
        let threads = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || reg.register(handle("fact")).is_ok())
            })
            .collect::<Vec<_>>();
        let wins = threads
            .into_iter()
            .map(|t| t.join().expect("thread"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(reg.names(), vec!["fact".to_string()]);
    }

    #[test]
    fn reserved_name_blocks_other_creators_until_released() {
        let reg = DatasetRegistry::new();
        let held = reg.reserve("facts").expect("reserve");
        assert!(matches!(reg.reserve("facts"), Err(MfqError::Conflict(_))));
        assert!(matches!(
            reg.register(handle("facts")),
            Err(MfqError::Conflict(_))
        ));
        assert!(reg.names().is_empty());
        drop(held);

        let again = reg.reserve("facts").expect("released on drop");
        again.commit(handle("facts")).expect("commit");
        assert_eq!(reg.names(), vec!["facts".to_string()]);
        assert!(matches!(reg.reserve("facts"), Err(MfqError::Conflict(_))));
    }

    #[test]
    fn commit_under_a_different_name_is_refused() {
        let reg = DatasetRegistry::new();
        let held = reg.reserve("a").expect("reserve");
        assert!(held.commit(handle("b")).is_err());
        assert!(!reg.contains("a"));
        assert!(!reg.contains("b"));
    }

    #[test]
    fn unknown_dataset_lookup_fails() {
        let reg = DatasetRegistry::new();
        assert!(matches!(
            reg.get("nope"),
            Err(MfqError::UnknownDataset(_))
        ));
    }
}
