//! Reservation allocator: the only component that mutates unit pools.
//!
//! Each product's pool sits behind its own `Mutex`; the outer `RwLock` only
//! guards the product -> pool map. A `reserve` call therefore checks and flips
//! units in one critical section per product, which is what keeps two buyers
//! from ever receiving the same serial.
//!
//! Operations that touch several pools at once (settling a hold) lock them in
//! ascending `ProductId` order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use unitcart_catalog::{CatalogError, StockLevels};
use unitcart_core::{OrderId, ProductId};

use crate::error::InventoryError;
use crate::hold::Hold;
use crate::pool::{Serial, Unit, UnitPool};

type SharedPool = Arc<Mutex<UnitPool>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Commit,
    Release,
}

#[derive(Debug, Default)]
pub struct ReservationAllocator {
    pools: RwLock<HashMap<ProductId, SharedPool>>,
    holds: Mutex<HashMap<OrderId, Hold>>,
}

impl ReservationAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append serials to a product's pool, creating the pool on first stock-in.
    pub fn receive_units(
        &self,
        product_id: ProductId,
        serials: Vec<Serial>,
    ) -> Result<usize, InventoryError> {
        let pool = {
            let mut pools = self.pools.write().map_err(|_| InventoryError::LockPoisoned)?;
            pools
                .entry(product_id)
                .or_insert_with(|| Arc::new(Mutex::new(UnitPool::new(product_id))))
                .clone()
        };

        let mut pool = lock(&pool)?;
        let added = pool.add_units(serials)?;
        info!(
            product_id = %product_id,
            added,
            available = pool.available_count(),
            "units received into pool"
        );
        Ok(added)
    }

    pub fn available_units(&self, product_id: ProductId) -> Result<u32, InventoryError> {
        let pool = self.pool(product_id)?;
        let pool = lock(&pool)?;
        Ok(pool.available_count())
    }

    /// Claim `quantity` serials of `product_id`, earliest-inserted first.
    ///
    /// All or nothing: on `InsufficientStock` the pool is unchanged.
    pub fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Vec<Serial>, InventoryError> {
        let pool = self.pool(product_id)?;
        let mut pool = lock(&pool)?;
        match pool.reserve(quantity) {
            Ok(serials) => {
                info!(
                    product_id = %product_id,
                    quantity,
                    serials = ?serials,
                    remaining = pool.available_count(),
                    "units reserved"
                );
                Ok(serials)
            }
            Err(err) => {
                warn!(product_id = %product_id, quantity, error = %err, "reservation refused");
                Err(err)
            }
        }
    }

    /// Return reserved serials to the pool.
    pub fn release(&self, product_id: ProductId, serials: &[Serial]) -> Result<(), InventoryError> {
        let pool = self.pool(product_id)?;
        let mut pool = lock(&pool)?;
        pool.release(serials)?;
        info!(
            product_id = %product_id,
            released = serials.len(),
            available = pool.available_count(),
            "units released"
        );
        Ok(())
    }

    /// Mark reserved serials as sold. Sold units never return to the pool.
    pub fn commit(&self, product_id: ProductId, serials: &[Serial]) -> Result<(), InventoryError> {
        let pool = self.pool(product_id)?;
        let mut pool = lock(&pool)?;
        pool.commit(serials)?;
        info!(product_id = %product_id, sold = serials.len(), "units committed");
        Ok(())
    }

    /// Copy of a pool's units in insertion order.
    pub fn snapshot(&self, product_id: ProductId) -> Result<Vec<Unit>, InventoryError> {
        let pool = self.pool(product_id)?;
        let pool = lock(&pool)?;
        Ok(pool.units().to_vec())
    }

    /// Track reserved serials for an order so they can be settled or expired.
    pub fn place_hold(&self, hold: Hold) -> Result<(), InventoryError> {
        let mut holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
        if holds.contains_key(&hold.order_id) {
            return Err(InventoryError::HoldExists(hold.order_id));
        }
        debug!(
            order_id = %hold.order_id,
            units = hold.unit_count(),
            expires_at = %hold.expires_at,
            "reservation hold placed"
        );
        holds.insert(hold.order_id, hold);
        Ok(())
    }

    pub fn hold(&self, order_id: OrderId) -> Result<Option<Hold>, InventoryError> {
        let holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
        Ok(holds.get(&order_id).cloned())
    }

    pub fn hold_count(&self) -> Result<usize, InventoryError> {
        let holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
        Ok(holds.len())
    }

    /// Payment succeeded: the held units become sold and the hold is dropped.
    pub fn commit_hold(&self, order_id: OrderId) -> Result<Hold, InventoryError> {
        self.settle(order_id, Settlement::Commit)
    }

    /// Payment failed, was cancelled or timed out: the held units become
    /// available again and the hold is dropped.
    pub fn release_hold(&self, order_id: OrderId) -> Result<Hold, InventoryError> {
        self.settle(order_id, Settlement::Release)
    }

    /// Holds whose expiry is at or before `now`, oldest first.
    pub fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Hold>, InventoryError> {
        let holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
        let mut expired: Vec<Hold> = holds
            .values()
            .filter(|h| h.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|h| h.expires_at);
        Ok(expired)
    }

    fn pool(&self, product_id: ProductId) -> Result<SharedPool, InventoryError> {
        let pools = self.pools.read().map_err(|_| InventoryError::LockPoisoned)?;
        pools
            .get(&product_id)
            .cloned()
            .ok_or(InventoryError::UnknownProduct(product_id))
    }

    fn settle(&self, order_id: OrderId, settlement: Settlement) -> Result<Hold, InventoryError> {
        let hold = {
            let mut holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
            holds
                .remove(&order_id)
                .ok_or(InventoryError::UnknownHold(order_id))?
        };

        match self.apply_settlement(&hold, settlement) {
            Ok(()) => {
                info!(
                    order_id = %order_id,
                    settlement = ?settlement,
                    units = hold.unit_count(),
                    "reservation hold settled"
                );
                Ok(hold)
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "failed to settle reservation hold");
                let mut holds = self.holds.lock().map_err(|_| InventoryError::LockPoisoned)?;
                holds.insert(order_id, hold);
                Err(err)
            }
        }
    }

    fn apply_settlement(&self, hold: &Hold, settlement: Settlement) -> Result<(), InventoryError> {
        let mut grouped: BTreeMap<ProductId, Vec<Serial>> = BTreeMap::new();
        for line in &hold.lines {
            grouped
                .entry(line.product_id)
                .or_default()
                .extend(line.serials.iter().cloned());
        }

        let pools = grouped
            .keys()
            .map(|id| self.pool(*id).map(|pool| (*id, pool)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut guards = Vec::with_capacity(pools.len());
        for (id, pool) in &pools {
            guards.push((*id, lock(pool)?));
        }

        // Validate every pool before mutating any of them.
        for (id, guard) in &guards {
            if let Some(serials) = grouped.get(id) {
                guard.check_reserved(serials)?;
            }
        }

        for (id, guard) in guards.iter_mut() {
            if let Some(serials) = grouped.get(id) {
                match settlement {
                    Settlement::Commit => guard.commit(serials)?,
                    Settlement::Release => guard.release(serials)?,
                }
            }
        }

        Ok(())
    }
}

fn lock(pool: &SharedPool) -> Result<MutexGuard<'_, UnitPool>, InventoryError> {
    pool.lock().map_err(|_| InventoryError::LockPoisoned)
}

/// A product with no received units has no pool yet and reads as zero stock.
impl StockLevels for ReservationAllocator {
    fn available_units(&self, id: ProductId) -> Result<u32, CatalogError> {
        match ReservationAllocator::available_units(self, id) {
            Ok(count) => Ok(count),
            Err(InventoryError::UnknownProduct(_)) => Ok(0),
            Err(err) => Err(CatalogError::Unavailable(err.to_string())),
        }
    }
}
