use super::money::Money;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type OrderId = Uuid;
pub type UserId = String;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(LedgerError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller, as handed over by the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_view(&self, order: &Order) -> bool {
        self.is_admin() || order.user_id == self.user_id
    }

    pub fn scope(&self) -> ViewerScope {
        match self.role {
            Role::Admin => ViewerScope::Admin,
            Role::User => ViewerScope::User(self.user_id.clone()),
        }
    }
}

/// Partition of cached order views. Admins share one view, users each get their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewerScope {
    Admin,
    User(UserId),
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct OrderItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(sku: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price,
        }
    }

    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A validated order-creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub client_token: String,
}

impl NewOrder {
    pub fn new(
        user_id: impl Into<UserId>,
        items: Vec<OrderItem>,
        client_token: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let client_token = client_token.into().trim().to_string();
        if client_token.is_empty() {
            return Err(LedgerError::Validation(
                "client_token must not be empty".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(LedgerError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }
        for item in &items {
            if item.sku.trim().is_empty() {
                return Err(LedgerError::Validation("item sku must not be empty".to_string()));
            }
            if item.quantity == 0 {
                return Err(LedgerError::Validation(format!(
                    "item {} must have a positive quantity",
                    item.sku
                )));
            }
        }
        Ok(Self {
            user_id: user_id.into(),
            items,
            client_token,
        })
    }

    /// Sum of `unit_price * quantity` over all items.
    pub fn total(&self) -> Result<Money, LedgerError> {
        self.items.iter().try_fold(Money::ZERO, |acc, item| {
            item.subtotal()
                .and_then(|subtotal| acc.checked_add(subtotal))
                .ok_or_else(|| LedgerError::Validation("order total overflows".to_string()))
        })
    }
}

/// An order row.
///
/// `total_amount` is fixed at creation; `version` is bumped by every status mutation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
    pub client_token: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn create(new_order: NewOrder, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let total_amount = new_order.total()?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            status: OrderStatus::Pending,
            total_amount,
            items: new_order.items,
            client_token: new_order.client_token,
            version: 1,
            created_at: now,
            updated_at: now,
            paid_at: None,
        })
    }

    /// Applies a status change and bumps the version. Callers check the version predicate.
    pub fn transition(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.version += 1;
        self.updated_at = now;
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) {
        self.transition(OrderStatus::Paid, now);
        self.paid_at = Some(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// Substring matched against item SKUs.
    pub q: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }
}

/// A fully scoped listing query. `owner` is set for non-admin callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub owner: Option<UserId>,
    pub filter: OrderFilter,
    pub pagination: Pagination,
}

impl OrderQuery {
    pub fn for_principal(principal: &Principal, filter: OrderFilter, pagination: Pagination) -> Self {
        Self {
            owner: (!principal.is_admin()).then(|| principal.user_id.clone()),
            filter,
            pagination,
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if let Some(owner) = &self.owner
            && &order.user_id != owner
        {
            return false;
        }
        if let Some(status) = self.filter.status
            && order.status != status
        {
            return false;
        }
        match self.filter.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => order.items.iter().any(|item| item.sku.contains(q)),
            _ => true,
        }
    }

    /// Filters, sorts newest-first (ties by id) and paginates. Shared by every store adapter.
    pub fn run<I>(&self, orders: I) -> OrderPage
    where
        I: IntoIterator<Item = Order>,
    {
        let mut matching: Vec<Order> = orders.into_iter().filter(|o| self.matches(o)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(self.pagination.offset())
            .take(self.pagination.limit as usize)
            .collect();

        OrderPage { orders, total }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}
