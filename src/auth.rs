//! Caller identity and capability checks.
//!
//! Authentication itself lives upstream: the gateway verifies the bearer
//! token and forwards the result as `x-user-id` / `x-user-role` headers.
//! This module only extracts that identity and decides, in one place, which
//! identity may perform which action on which resource.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Delivery,
    Admin,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" => Some(Role::Customer),
            "delivery" => Some(Role::Delivery),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A verified caller: who they are and what hat they wear.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok());

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(Role::parse);

        match (id, role) {
            (Some(id), Some(role)) => Ok(Identity { id, role }),
            _ => Err(AppError::Forbidden("missing or malformed identity".to_string())),
        }
    }
}

/// Everything a caller can ask the delivery core to do.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    RegisterWorker,
    ListWorkers,
    ViewWorker { worker_id: Uuid },
    ToggleAvailability { worker_id: Uuid },
    PlaceOrder,
    ViewOrder { order: &'a Order },
    AssignOrder,
    MarkPickup { order: &'a Order },
    MarkDelivered { order: &'a Order },
    CancelOrder { order: &'a Order },
    PublishLocation { order: &'a Order },
}

/// Single capability gate shared by the registry, the resolver and the hub.
pub fn authorize(identity: &Identity, action: Action<'_>) -> Result<(), AppError> {
    let allowed = match action {
        Action::RegisterWorker | Action::ListWorkers | Action::AssignOrder => {
            identity.role == Role::Admin
        }
        Action::ViewWorker { worker_id } | Action::ToggleAvailability { worker_id } => {
            identity.role == Role::Admin
                || (identity.role == Role::Delivery && identity.id == worker_id)
        }
        Action::PlaceOrder => identity.role == Role::Customer,
        Action::ViewOrder { order } => match identity.role {
            Role::Admin => true,
            Role::Customer => order.customer_id == identity.id,
            Role::Delivery => order.assigned_to == Some(identity.id),
        },
        Action::MarkPickup { order }
        | Action::MarkDelivered { order }
        | Action::PublishLocation { order } => {
            identity.role == Role::Delivery && order.assigned_to == Some(identity.id)
        }
        Action::CancelOrder { order } => {
            identity.role == Role::Admin
                || (identity.role == Role::Customer && order.customer_id == identity.id)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden("not authorized for this action".to_string()))
    }
}

/// Opaque bearer token handed back on register/login. The upstream identity
/// provider owns verification and expiry; this value is only a handle.
pub fn issue_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{authorize, Action, Identity, Role};
    use crate::models::order::{Order, OrderStatus};

    fn order(customer: Uuid, assignee: Option<Uuid>) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: customer,
            delivery_charge: 5.0,
            status: if assignee.is_some() {
                OrderStatus::Assigned
            } else {
                OrderStatus::Placed
            },
            assigned_to: assignee,
            created_at: Utc::now(),
            delivered_at: None,
            last_location: None,
        }
    }

    #[test]
    fn only_admin_registers_workers() {
        let admin = Identity { id: Uuid::new_v4(), role: Role::Admin };
        let customer = Identity { id: Uuid::new_v4(), role: Role::Customer };

        assert!(authorize(&admin, Action::RegisterWorker).is_ok());
        assert!(authorize(&customer, Action::RegisterWorker).is_err());
    }

    #[test]
    fn worker_may_view_only_itself() {
        let worker_id = Uuid::new_v4();
        let own = Identity { id: worker_id, role: Role::Delivery };
        let other = Identity { id: Uuid::new_v4(), role: Role::Delivery };

        assert!(authorize(&own, Action::ViewWorker { worker_id }).is_ok());
        assert!(authorize(&other, Action::ViewWorker { worker_id }).is_err());
    }

    #[test]
    fn only_assignee_publishes_location() {
        let assignee = Uuid::new_v4();
        let order = order(Uuid::new_v4(), Some(assignee));

        let own = Identity { id: assignee, role: Role::Delivery };
        let other = Identity { id: Uuid::new_v4(), role: Role::Delivery };
        let admin = Identity { id: Uuid::new_v4(), role: Role::Admin };

        assert!(authorize(&own, Action::PublishLocation { order: &order }).is_ok());
        assert!(authorize(&other, Action::PublishLocation { order: &order }).is_err());
        assert!(authorize(&admin, Action::PublishLocation { order: &order }).is_err());
    }

    #[test]
    fn customer_may_cancel_own_order_only() {
        let customer = Uuid::new_v4();
        let order = order(customer, None);

        let own = Identity { id: customer, role: Role::Customer };
        let other = Identity { id: Uuid::new_v4(), role: Role::Customer };

        assert!(authorize(&own, Action::CancelOrder { order: &order }).is_ok());
        assert!(authorize(&other, Action::CancelOrder { order: &order }).is_err());
    }
}
