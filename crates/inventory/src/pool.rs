use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use unitcart_core::ProductId;

use crate::error::InventoryError;

/// Serial number of one physical unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(String);

impl Serial {
    pub fn new(serial: impl Into<String>) -> Result<Self, InventoryError> {
        let serial = serial.into();
        let trimmed = serial.trim();
        if trimmed.is_empty() {
            return Err(InventoryError::InvalidSerial("serial cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Serial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one unit. `Reserved` and `Sold` both count as "not available";
/// only `Reserved` units can be released back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Available,
    Reserved,
    Sold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub serial: Serial,
    pub state: UnitState,
}

impl Unit {
    pub fn is_available(&self) -> bool {
        self.state == UnitState::Available
    }
}

/// Units of one product in insertion order.
///
/// Invariant: `available` equals the number of units in `Available` state.
#[derive(Debug, Clone)]
pub struct UnitPool {
    product_id: ProductId,
    units: Vec<Unit>,
    index: HashMap<Serial, usize>,
    available: u32,
    /// No unit before this position is available.
    first_available: usize,
}

impl UnitPool {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            units: Vec::new(),
            index: HashMap::new(),
            available: 0,
            first_available: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn available_count(&self) -> u32 {
        self.available
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn state_of(&self, serial: &Serial) -> Option<UnitState> {
        self.index
            .get(serial)
            .and_then(|&i| self.units.get(i))
            .map(|u| u.state)
    }

    /// Append new units. The whole batch is rejected if any serial repeats,
    /// within the batch or against units already in the pool.
    pub fn add_units(&mut self, serials: Vec<Serial>) -> Result<usize, InventoryError> {
        let mut seen = HashSet::with_capacity(serials.len());
        for serial in &serials {
            if self.index.contains_key(serial) || !seen.insert(serial) {
                return Err(InventoryError::DuplicateSerial {
                    product_id: self.product_id,
                    serial: serial.clone(),
                });
            }
        }

        let added = serials.len();
        for serial in serials {
            self.index.insert(serial.clone(), self.units.len());
            self.units.push(Unit {
                serial,
                state: UnitState::Available,
            });
        }
        self.available += u32::try_from(added).unwrap_or(u32::MAX);
        Ok(added)
    }

    /// Claim the `quantity` earliest-inserted available units.
    ///
    /// Either all of them flip to `Reserved` or the pool is left untouched.
    pub fn reserve(&mut self, quantity: u32) -> Result<Vec<Serial>, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: self.product_id,
            });
        }
        if self.available < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }

        let wanted = quantity as usize;
        let start = self.first_available;
        let mut claimed = Vec::with_capacity(wanted);
        let mut next = start;
        for (offset, unit) in self.units.iter_mut().skip(start).enumerate() {
            if claimed.len() == wanted {
                break;
            }
            if unit.state == UnitState::Available {
                unit.state = UnitState::Reserved;
                claimed.push(unit.serial.clone());
                next = start + offset + 1;
            }
        }

        self.first_available = next;
        self.available -= quantity;
        Ok(claimed)
    }

    /// Return reserved units to `Available`. Validates every serial before
    /// touching any of them.
    pub fn release(&mut self, serials: &[Serial]) -> Result<(), InventoryError> {
        let positions = self.reserved_positions(serials)?;
        for &i in &positions {
            if let Some(unit) = self.units.get_mut(i) {
                unit.state = UnitState::Available;
            }
        }
        if let Some(&lowest) = positions.iter().min() {
            self.first_available = self.first_available.min(lowest);
        }
        self.available += u32::try_from(positions.len()).unwrap_or(u32::MAX);
        Ok(())
    }

    /// Mark reserved units as permanently sold.
    pub fn commit(&mut self, serials: &[Serial]) -> Result<(), InventoryError> {
        let positions = self.reserved_positions(serials)?;
        for i in positions {
            if let Some(unit) = self.units.get_mut(i) {
                unit.state = UnitState::Sold;
            }
        }
        Ok(())
    }

    /// Check that `serials` can be released or committed, without mutating.
    pub fn check_reserved(&self, serials: &[Serial]) -> Result<(), InventoryError> {
        self.reserved_positions(serials).map(|_| ())
    }

    fn reserved_positions(&self, serials: &[Serial]) -> Result<Vec<usize>, InventoryError> {
        let mut seen = HashSet::with_capacity(serials.len());
        let mut positions = Vec::with_capacity(serials.len());
        for serial in serials {
            let Some(&i) = self.index.get(serial) else {
                return Err(InventoryError::UnknownSerial {
                    product_id: self.product_id,
                    serial: serial.clone(),
                });
            };
            let reserved = self
                .units
                .get(i)
                .is_some_and(|u| u.state == UnitState::Reserved);
            if !reserved || !seen.insert(i) {
                return Err(InventoryError::SerialNotReserved {
                    product_id: self.product_id,
                    serial: serial.clone(),
                });
            }
            positions.push(i);
        }
        Ok(positions)
    }
}
