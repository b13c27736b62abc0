use merchant_common::Amount;
use serde::{Deserialize, Serialize};

use crate::{
    crypto::HashCode,
    db_types::{InstanceId, OrderId},
};

/// Emitted once every coin of a payment has been accepted by its exchange and the contract is marked paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    pub instance: InstanceId,
    pub order_id: OrderId,
    pub h_contract_terms: HashCode,
    pub amount: Amount,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIncreasedEvent {
    pub instance: InstanceId,
    pub order_id: OrderId,
    pub h_contract_terms: HashCode,
    /// The new refund total for the order
    pub refund_total: Amount,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    OrderPaid(OrderPaidEvent),
    RefundIncreased(RefundIncreasedEvent),
}
