use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unitcart_core::{OrderId, ProductId};

use crate::pool::Serial;

/// Serials of one product claimed for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldLine {
    pub product_id: ProductId,
    pub serials: Vec<Serial>,
}

/// Units reserved for an order that has not reached a terminal payment status.
///
/// A hold that outlives `expires_at` is released by the expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub order_id: OrderId,
    pub lines: Vec<HoldLine>,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn unit_count(&self) -> usize {
        self.lines.iter().map(|l| l.serials.len()).sum()
    }
}
