use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, RandomState};
use std::sync::{Mutex, MutexGuard};

use wms_core::{LocationId, ProductId};
use wms_inventory::{net_deltas, StockChange, StockDelta, StockKey, StockRow};

use super::{check_delta, LedgerError, StockLedger};

pub const DEFAULT_STRIPES: usize = 64;

type Stripe = HashMap<StockKey, i64>;

/// In-memory ledger with lock striping.
///
/// Rows are spread over `N` mutex-guarded stripes by key hash. A batch locks
/// every stripe it touches in ascending stripe order, validates all resulting
/// quantities, and only then writes. Batches over disjoint stripes run in
/// parallel; overlapping batches serialize.
#[derive(Debug)]
pub struct InMemoryStockLedger {
    stripes: Vec<Mutex<Stripe>>,
    hasher: RandomState,
}

impl Default for InMemoryStockLedger {
    fn default() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger with `stripes` locks (at least one).
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_of(&self, key: &StockKey) -> usize {
        (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize
    }

    fn lock(&self, stripe: usize) -> Result<MutexGuard<'_, Stripe>, LedgerError> {
        self.stripes[stripe]
            .lock()
            .map_err(|_| LedgerError::Storage("ledger stripe lock poisoned".to_string()))
    }
}

impl StockLedger for InMemoryStockLedger {
    fn quantity(&self, key: &StockKey) -> Result<i64, LedgerError> {
        let stripe = self.lock(self.stripe_of(key))?;
        Ok(stripe.get(key).copied().unwrap_or(0))
    }

    fn apply(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError> {
        let deltas = net_deltas(deltas).map_err(|key| LedgerError::Overflow { key })?;
        if deltas.is_empty() {
            return Ok(vec![]);
        }

        // BTreeMap iteration is ascending, which fixes the lock order.
        let mut guards: BTreeMap<usize, MutexGuard<'_, Stripe>> = BTreeMap::new();
        let mut wanted: Vec<usize> = deltas.iter().map(|d| self.stripe_of(&d.key)).collect();
        wanted.sort_unstable();
        wanted.dedup();
        for stripe in wanted {
            guards.insert(stripe, self.lock(stripe)?);
        }

        let mut changes = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            let stripe = guards
                .get(&self.stripe_of(&delta.key))
                .ok_or_else(|| LedgerError::Storage("stripe not locked".to_string()))?;
            let before = stripe.get(&delta.key).copied().unwrap_or(0);
            changes.push(check_delta(delta, before)?);
        }

        for change in &changes {
            if let Some(stripe) = guards.get_mut(&self.stripe_of(&change.key)) {
                stripe.insert(change.key, change.after);
            }
        }

        Ok(changes)
    }

    fn rows(&self, product_id: Option<ProductId>, location_id: Option<LocationId>) -> Result<Vec<StockRow>, LedgerError> {
        let mut rows = Vec::new();
        for idx in 0..self.stripes.len() {
            let stripe = self.lock(idx)?;
            rows.extend(
                stripe
                    .iter()
                    .filter(|(key, _)| product_id.is_none_or(|p| p == key.product_id))
                    .filter(|(key, _)| location_id.is_none_or(|l| l == key.location_id))
                    .map(|(key, quantity)| StockRow {
                        product_id: key.product_id,
                        location_id: key.location_id,
                        quantity: *quantity,
                    }),
            );
        }
        rows.sort_by_key(StockRow::key);
        Ok(rows)
    }
}
