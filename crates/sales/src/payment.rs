use serde::{Deserialize, Serialize};

/// How the customer pays. Each method carries only what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    DebitCard,
    NetBanking { bank: Option<String> },
    Upi { vpa: Option<String> },
    /// Cash on delivery. Settled by the courier, never by the gateway.
    Cod,
    Other { provider: String },
}

impl PaymentMethod {
    pub fn is_cod(&self) -> bool {
        matches!(self, PaymentMethod::Cod)
    }

    /// Every method except COD is collected through the payment gateway.
    pub fn uses_gateway(&self) -> bool {
        !self.is_cod()
    }

    /// Stable lower-case label stored on persisted orders.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::NetBanking { .. } => "net_banking",
            PaymentMethod::Upi { .. } => "upi",
            PaymentMethod::Cod => "cod",
            PaymentMethod::Other { .. } => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Payment sub-record of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    /// Order reference issued by the gateway, if the method uses one.
    pub gateway_order_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl PaymentRecord {
    pub fn pending(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            gateway_order_ref: None,
            failure_reason: None,
        }
    }
}
