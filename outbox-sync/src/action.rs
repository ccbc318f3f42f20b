/// Pending actions: mutations that have not yet been confirmed remotely

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Well-known storefront action kinds
pub mod kinds {
    pub const ADD_TO_CART: &str = "add_to_cart";
    pub const REMOVE_FROM_CART: &str = "remove_from_cart";
    pub const UPDATE_CART: &str = "update_cart";
    pub const ADD_TO_WISHLIST: &str = "add_to_wishlist";
    pub const REMOVE_FROM_WISHLIST: &str = "remove_from_wishlist";
    pub const ADD_ADDRESS: &str = "add_address";
    pub const REMOVE_ADDRESS: &str = "remove_address";
    pub const CREATE_ORDER: &str = "create_order";
}

/// Unique identifier for a pending action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    /// Create a new random action ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tag naming the remote operation an action replays
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKind(pub String);

impl ActionKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A mutation waiting to be delivered to the remote system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique ID, stable for the action's lifetime
    pub id: ActionId,
    /// Which remote operation this represents
    pub kind: ActionKind,
    /// Caller-defined data needed to replay the action
    pub payload: serde_json::Value,
    /// When this action was enqueued (unix millis)
    pub enqueued_at: i64,
    /// Number of failed delivery attempts
    pub retry_count: u32,
    /// Time of the last failed attempt
    #[serde(default)]
    pub last_retry_at: Option<i64>,
    /// Error from the last failed attempt
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingAction {
    pub fn new(kind: ActionKind, payload: serde_json::Value, enqueued_at: i64) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            payload,
            enqueued_at,
            retry_count: 0,
            last_retry_at: None,
            last_error: None,
        }
    }

    /// Record a failed attempt
    pub fn mark_retry(&mut self, error: Option<String>, now_ms: i64) {
        self.retry_count += 1;
        self.last_retry_at = Some(now_ms);
        self.last_error = error;
    }

    /// Age of this action in milliseconds
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.enqueued_at
    }

    /// Check if the action is older than `max_age_ms`
    pub fn is_expired(&self, max_age_ms: i64, now_ms: i64) -> bool {
        self.age_ms(now_ms) > max_age_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_ids_unique() {
        let a = ActionId::new();
        let b = ActionId::new();
        assert_ne!(a, b);
        assert_eq!(ActionId::from("x").to_string(), "x");
    }

    #[test]
    fn test_new_action() {
        let action = PendingAction::new(kinds::ADD_TO_CART.into(), json!({"sku": "beans"}), 10);
        assert_eq!(action.kind.as_str(), "add_to_cart");
        assert_eq!(action.retry_count, 0);
        assert!(action.last_retry_at.is_none());
    }

    #[test]
    fn test_mark_retry() {
        let mut action = PendingAction::new("create_order".into(), json!(null), 0);
        action.mark_retry(Some("503".into()), 500);
        action.mark_retry(None, 900);

        assert_eq!(action.retry_count, 2);
        assert_eq!(action.last_retry_at, Some(900));
        assert!(action.last_error.is_none());
    }

    #[test]
    fn test_expiry() {
        let action = PendingAction::new("update_cart".into(), json!([]), 1_000);
        assert_eq!(action.age_ms(4_000), 3_000);
        assert!(!action.is_expired(3_000, 4_000));
        assert!(action.is_expired(2_999, 4_000));
    }

    #[test]
    fn test_serialized_shape() {
        let action = PendingAction::new("add_address".into(), json!({"city": "Oban"}), 42);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], "add_address");
        assert_eq!(value["enqueued_at"], 42);
        assert!(value["id"].is_string());

        // Older entries without retry bookkeeping still load
        let legacy = json!({
            "id": "a1",
            "kind": "add_address",
            "payload": {},
            "enqueued_at": 1,
            "retry_count": 2
        });
        let loaded: PendingAction = serde_json::from_value(legacy).unwrap();
        assert_eq!(loaded.retry_count, 2);
        assert!(loaded.last_error.is_none());
    }
}
