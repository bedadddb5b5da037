use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Subscription,
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

/// Payment audit record. Never consulted for admission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub id: String,
    pub kind: TransactionKind,
    /// Minor currency units
    pub amount: u64,
    pub status: TransactionStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub description: String,
}

impl PaymentTransaction {
    pub fn succeeded(
        id: String,
        kind: TransactionKind,
        amount: u64,
        now: i64,
        description: String,
    ) -> Self {
        PaymentTransaction {
            id,
            kind,
            amount,
            status: TransactionStatus::Success,
            created_at: now,
            updated_at: now,
            description,
        }
    }

    pub fn mark_refunded(&mut self, now: i64) {
        self.status = TransactionStatus::Refunded;
        self.updated_at = now;
    }
}
