use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use wms_core::{LocationId, ProductId, ValueObject};

/// Ledger row key. Ordered so batches can be locked and audited in a stable order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
        }
    }
}

impl ValueObject for StockKey {}

/// A signed quantity change for one ledger row.
///
/// `expected_before` turns the delta into a compare-and-apply: the ledger
/// rejects the batch if the row no longer holds that quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub key: StockKey,
    pub delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_before: Option<i64>,
}

impl StockDelta {
    pub fn new(key: StockKey, delta: i64) -> Self {
        Self {
            key,
            delta,
            expected_before: None,
        }
    }

    pub fn expecting(mut self, before: i64) -> Self {
        self.expected_before = Some(before);
        self
    }

    /// The compensating delta. Expectations are not carried over.
    ///
    /// Netted batches never carry `i64::MIN`, so the inverse of a committed
    /// delta is exact.
    pub fn inverse(&self) -> Self {
        Self::new(self.key, self.delta.saturating_neg())
    }
}

impl ValueObject for StockDelta {}

/// Before/after quantities of one row touched by a committed batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub key: StockKey,
    pub before: i64,
    pub after: i64,
}

impl StockChange {
    pub fn delta(&self) -> i64 {
        self.after - self.before
    }
}

/// On-hand quantity for one (product, location) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

impl StockRow {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }
}

/// Sum deltas per key; pairs netting to zero are dropped.
///
/// The output is sorted by key. If several inputs for one key carry an
/// expectation, the first one wins.
///
/// Fails with the offending key when a sum leaves the range whose negation is
/// representable, i.e. overflows `i64` or lands on `i64::MIN`.
pub fn net_deltas<'a>(deltas: impl IntoIterator<Item = &'a StockDelta>) -> Result<Vec<StockDelta>, StockKey> {
    let mut acc: BTreeMap<StockKey, (i64, Option<i64>)> = BTreeMap::new();
    for d in deltas {
        let entry = acc.entry(d.key).or_insert((0, None));
        entry.0 = entry
            .0
            .checked_add(d.delta)
            .filter(|sum| *sum != i64::MIN)
            .ok_or(d.key)?;
        if entry.1.is_none() {
            entry.1 = d.expected_before;
        }
    }

    Ok(acc
        .into_iter()
        .filter(|(_, (delta, _))| *delta != 0)
        .map(|(key, (delta, expected_before))| StockDelta {
            key,
            delta,
            expected_before,
        })
        .collect())
}
