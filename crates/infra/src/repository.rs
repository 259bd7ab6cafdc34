use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use wms_core::AggregateRoot;
use wms_inventory::StockError;

/// In-memory aggregate store with one mutex per aggregate.
///
/// Holding an aggregate's guard serializes every transition on it; the map
/// lock is only held while looking handles up.
#[derive(Debug)]
pub struct InMemoryRepository<A>
where
    A: AggregateRoot,
{
    inner: RwLock<HashMap<A::Id, Arc<Mutex<A>>>>,
}

impl<A> Default for InMemoryRepository<A>
where
    A: AggregateRoot,
{
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<A> InMemoryRepository<A>
where
    A: AggregateRoot,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &A::Id) -> Result<Option<Arc<Mutex<A>>>, StockError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(id).cloned())
    }

    /// Store a new aggregate. Fails if the id is taken.
    pub fn insert(&self, aggregate: A) -> Result<Arc<Mutex<A>>, StockError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let id = aggregate.id().clone();
        if map.contains_key(&id) {
            return Err(StockError::Domain(wms_core::DomainError::conflict(format!(
                "aggregate {id:?} already exists"
            ))));
        }
        let handle = Arc::new(Mutex::new(aggregate));
        map.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn handles(&self) -> Result<Vec<Arc<Mutex<A>>>, StockError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock one aggregate.
pub fn lock<A>(handle: &Mutex<A>) -> Result<MutexGuard<'_, A>, StockError> {
    handle.lock().map_err(|_| poisoned())
}

fn poisoned() -> StockError {
    StockError::Storage("repository lock poisoned".to_string())
}
