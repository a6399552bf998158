//! Sample aggregates shared by tests across the workspace.
//!
//! - [`OrderState`]: running total plus a lock grant, tag `Order`
//! - [`CustomerState`]: a name, tag `Customer`
//!
//! Both are deliberately small so tests can reason about exact folds.

use eventide_core::aggregate::AggregateState;
use eventide_core::event::Event;
use eventide_core::grants::{Grant, Grants};
use eventide_core::identity::{Identity, IdentityConverter, IdentityError, TypedIdentity};
use serde::{Deserialize, Serialize};

/// Grant name used by [`OrderEvent::Locked`].
pub const ORDER_LOCK: &str = "order-lock";

/// Events of the order fixture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// Amount added to the running total.
    AmountAdded {
        /// Amount, may be negative.
        amount: i64,
    },
    /// Order locked by a token.
    Locked {
        /// Lock holder.
        token: String,
    },
    /// Lock released.
    Unlocked,
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::AmountAdded { .. } => "OrderAmountAdded.v1",
            Self::Locked { .. } => "OrderLocked.v1",
            Self::Unlocked => "OrderUnlocked.v1",
        }
    }
}

/// Order state: sum of amounts and the lock grant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    /// Running total.
    pub total: i64,
    /// Number of amount events folded.
    pub lines: u32,
    /// Lock grant.
    pub grants: Grants,
}

impl AggregateState for OrderState {
    const AGGREGATE_TYPE: &'static str = "order";
    const TAG: &'static str = "Order";
    const SIGNATURE: &'static str = "order.v1";
    type Event = OrderEvent;

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::AmountAdded { amount } => {
                self.total += amount;
                self.lines += 1;
            }
            OrderEvent::Locked { token } => self.grants.add(Grant {
                grant_name: ORDER_LOCK.into(),
                token: token.clone(),
            }),
            OrderEvent::Unlocked => {
                self.grants.revoke(ORDER_LOCK);
            }
        }
    }
}

/// Same layout as [`OrderState`] with a newer signature, for stale snapshot tests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStateV2 {
    /// Running total.
    pub total: i64,
    /// Number of amount events folded.
    pub lines: u32,
    /// Lock grant.
    pub grants: Grants,
}

impl AggregateState for OrderStateV2 {
    const AGGREGATE_TYPE: &'static str = "order";
    const TAG: &'static str = "Order";
    const SIGNATURE: &'static str = "order.v2";
    type Event = OrderEvent;

    fn apply(&mut self, event: &OrderEvent) {
        if let OrderEvent::AmountAdded { amount } = event {
            self.total += amount;
            self.lines += 1;
        }
    }
}

/// Typed order id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderId(Identity);

impl OrderId {
    /// Order id with a numeric suffix.
    ///
    /// # Errors
    ///
    /// Never fails for the fixed `Order` tag; the `Result` mirrors [`Identity::numeric`].
    pub fn new(number: u64) -> Result<Self, IdentityError> {
        Identity::numeric(OrderState::TAG, number).map(Self)
    }
}

impl TypedIdentity for OrderId {
    const TAG: &'static str = OrderState::TAG;

    fn from_identity(identity: Identity) -> Self {
        Self(identity)
    }

    fn identity(&self) -> &Identity {
        &self.0
    }
}

/// Events of the customer fixture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    /// Customer registered.
    Registered {
        /// Display name.
        name: String,
    },
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        "CustomerRegistered.v1"
    }
}

/// Customer state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerState {
    /// Display name.
    pub name: Option<String>,
}

impl AggregateState for CustomerState {
    const AGGREGATE_TYPE: &'static str = "customer";
    const TAG: &'static str = "Customer";
    const SIGNATURE: &'static str = "customer.v1";
    type Event = CustomerEvent;

    fn apply(&mut self, event: &CustomerEvent) {
        match event {
            CustomerEvent::Registered { name } => self.name = Some(name.clone()),
        }
    }
}

/// Registry with both fixture aggregates registered.
///
/// # Errors
///
/// Returns [`IdentityError::DuplicateTag`] only if the fixture tags collide.
pub fn fixture_identities() -> Result<IdentityConverter, IdentityError> {
    let mut converter = IdentityConverter::new();
    converter.register_state::<OrderState>()?;
    converter.register_state::<CustomerState>()?;
    Ok(converter)
}

/// Shorthand for an amount event.
#[must_use]
pub const fn added(amount: i64) -> OrderEvent {
    OrderEvent::AmountAdded { amount }
}
