//! Persisted order document.
//!
//! Field names and shapes are a compatibility contract with existing order
//! storage: camelCase keys, `_id`, money in minor units, lower-case statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unitcart_cart::DeliveryOption;
use unitcart_core::{AggregateRoot, DomainError, Money, ProductId};

use crate::address::ShippingAddress;
use crate::order::{Order, OrderStatus};
use crate::payment::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRecord {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    /// Unit price charged.
    pub price: Money,
    pub serials: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDocument {
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub items: Vec<OrderItemRecord>,
    pub sub_total: Money,
    pub shipping_charges: Money,
    pub gst_amount: Money,
    pub total_amount: Money,
    pub payment: PaymentDocument,
    pub status: OrderStatus,
    pub delivery_option: DeliveryOption,
    pub shipping_address: Option<ShippingAddress>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Order> for OrderRecord {
    type Error = DomainError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        let (Some(payment), Some(created_at)) = (order.payment(), order.created_at()) else {
            return Err(DomainError::not_found());
        };
        let totals = order.totals();

        Ok(Self {
            id: order.id().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemRecord {
                    product_id: item.product_id,
                    name: item.name.clone(),
                    quantity: item.quantity,
                    price: item.unit_price,
                    serials: item.serials.iter().map(|s| s.as_str().to_string()).collect(),
                })
                .collect(),
            sub_total: totals.subtotal,
            shipping_charges: totals.shipping,
            gst_amount: totals.tax,
            total_amount: totals.total,
            payment: PaymentDocument {
                method: payment.method.label().to_string(),
                status: payment.status,
                transaction_id: payment.transaction_id.clone(),
            },
            status: order.status(),
            delivery_option: order.delivery(),
            shipping_address: order.shipping_address().cloned(),
            created_at,
        })
    }
}
