/// Cart, wishlist and address book resources built on `OptimisticResource`

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;

use outbox_core::snapshot::names;

use crate::action::{kinds, ActionId};
use crate::optimistic::{
    Mutation, OptimisticResource, ResourceContext, UpdateError, UpdateOutcome,
};
use crate::remote::RemoteError;

/// One line in the shopping cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Line id, distinct from the product id so one product can appear with
    /// different sizes or customizations
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub size: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub customizations: BTreeMap<String, String>,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: u32, size: impl Into<String>) -> Self {
        Self {
            id: ActionId::new().to_string(),
            product_id: product_id.into(),
            quantity,
            size: size.into(),
            customizations: BTreeMap::new(),
        }
    }

    pub fn with_customization(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.customizations.insert(key.into(), value.into());
        self
    }
}

pub type CartOutcome = Result<UpdateOutcome<Vec<CartLine>>, UpdateError>;

/// Optimistic shopping cart
pub struct OptimisticCart {
    resource: OptimisticResource<Vec<CartLine>>,
}

impl OptimisticCart {
    pub fn open(ctx: ResourceContext) -> Self {
        Self {
            resource: OptimisticResource::open(names::CART, kinds::UPDATE_CART, Vec::new(), ctx),
        }
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.resource.visible()
    }

    /// Total number of items across all lines
    pub fn item_count(&self) -> u32 {
        self.lines().iter().map(|l| l.quantity).sum()
    }

    pub fn resource(&self) -> &OptimisticResource<Vec<CartLine>> {
        &self.resource
    }

    pub async fn add_item<F, Fut>(&self, line: CartLine, remote_operation: F) -> CartOutcome
    where
        F: FnOnce(Vec<CartLine>) -> Fut,
        Fut: Future<Output = Result<Vec<CartLine>, RemoteError>>,
    {
        let current = self.resource.visible();
        let mut updated = current.clone();
        let payload = json!({ "line": line });
        updated.push(line);

        let mutation = Mutation::new(updated, current).with_action(kinds::ADD_TO_CART, payload);
        self.resource.update(mutation, remote_operation).await
    }

    pub async fn remove_item<F, Fut>(&self, line_id: &str, remote_operation: F) -> CartOutcome
    where
        F: FnOnce(Vec<CartLine>) -> Fut,
        Fut: Future<Output = Result<Vec<CartLine>, RemoteError>>,
    {
        let current = self.resource.visible();
        if !current.iter().any(|l| l.id == line_id) {
            return Ok(UpdateOutcome::Unchanged);
        }
        let updated: Vec<CartLine> = current.iter().filter(|l| l.id != line_id).cloned().collect();

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::REMOVE_FROM_CART, json!({ "id": line_id }));
        self.resource.update(mutation, remote_operation).await
    }

    /// Set a line's quantity; a quantity of zero removes the line
    pub async fn update_quantity<F, Fut>(
        &self,
        line_id: &str,
        quantity: u32,
        remote_operation: F,
    ) -> CartOutcome
    where
        F: FnOnce(Vec<CartLine>) -> Fut,
        Fut: Future<Output = Result<Vec<CartLine>, RemoteError>>,
    {
        if quantity == 0 {
            return self.remove_item(line_id, remote_operation).await;
        }

        let current = self.resource.visible();
        match current.iter().find(|l| l.id == line_id) {
            Some(line) if line.quantity != quantity => {}
            _ => return Ok(UpdateOutcome::Unchanged),
        }
        let updated: Vec<CartLine> = current
            .iter()
            .map(|l| {
                let mut l = l.clone();
                if l.id == line_id {
                    l.quantity = quantity;
                }
                l
            })
            .collect();

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::UPDATE_CART, json!({ "id": line_id, "quantity": quantity }));
        self.resource.update(mutation, remote_operation).await
    }
}

pub type WishlistOutcome = Result<UpdateOutcome<Vec<String>>, UpdateError>;

/// Optimistic wishlist of product ids
pub struct OptimisticWishlist {
    resource: OptimisticResource<Vec<String>>,
}

impl OptimisticWishlist {
    pub fn open(ctx: ResourceContext) -> Self {
        Self {
            resource: OptimisticResource::open(
                names::WISHLIST,
                kinds::ADD_TO_WISHLIST,
                Vec::new(),
                ctx,
            ),
        }
    }

    pub fn items(&self) -> Vec<String> {
        self.resource.visible()
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.items().iter().any(|p| p == product_id)
    }

    pub fn resource(&self) -> &OptimisticResource<Vec<String>> {
        &self.resource
    }

    /// Add `product_id`; already listed products are left alone
    pub async fn add<F, Fut>(&self, product_id: &str, remote_operation: F) -> WishlistOutcome
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<String>, RemoteError>>,
    {
        let current = self.resource.visible();
        if current.iter().any(|p| p == product_id) {
            return Ok(UpdateOutcome::Unchanged);
        }
        let mut updated = current.clone();
        updated.push(product_id.to_string());

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::ADD_TO_WISHLIST, json!({ "product_id": product_id }));
        self.resource.update(mutation, remote_operation).await
    }

    pub async fn remove<F, Fut>(&self, product_id: &str, remote_operation: F) -> WishlistOutcome
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<String>, RemoteError>>,
    {
        let current = self.resource.visible();
        if !current.iter().any(|p| p == product_id) {
            return Ok(UpdateOutcome::Unchanged);
        }
        let updated: Vec<String> = current.iter().filter(|p| *p != product_id).cloned().collect();

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::REMOVE_FROM_WISHLIST, json!({ "product_id": product_id }));
        self.resource.update(mutation, remote_operation).await
    }
}

/// Map position of a delivery address
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A saved delivery address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    /// Label shown to the user, e.g. "Home"
    pub name: String,
    pub address: String,
    pub phone: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl Address {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            id: ActionId::new().to_string(),
            name: name.into(),
            address: address.into(),
            phone: phone.into(),
            is_default: false,
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.coordinates = Some(Coordinates { lat, lng });
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

pub type AddressOutcome = Result<UpdateOutcome<Vec<Address>>, UpdateError>;

/// Optimistic address book
pub struct OptimisticAddresses {
    resource: OptimisticResource<Vec<Address>>,
}

impl OptimisticAddresses {
    pub fn open(ctx: ResourceContext) -> Self {
        Self {
            resource: OptimisticResource::open(
                names::ADDRESSES,
                kinds::ADD_ADDRESS,
                Vec::new(),
                ctx,
            ),
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.resource.visible()
    }

    pub fn get(&self, id: &str) -> Option<Address> {
        self.addresses().into_iter().find(|a| a.id == id)
    }

    /// The address marked default, if any
    pub fn default_address(&self) -> Option<Address> {
        self.addresses().into_iter().find(|a| a.is_default)
    }

    pub fn resource(&self) -> &OptimisticResource<Vec<Address>> {
        &self.resource
    }

    /// Add `address`, or replace the stored address with the same id
    ///
    /// A default address clears the flag on every other address.
    pub async fn add<F, Fut>(&self, address: Address, remote_operation: F) -> AddressOutcome
    where
        F: FnOnce(Vec<Address>) -> Fut,
        Fut: Future<Output = Result<Vec<Address>, RemoteError>>,
    {
        let current = self.resource.visible();
        if current.iter().any(|a| *a == address) {
            return Ok(UpdateOutcome::Unchanged);
        }

        let mut updated: Vec<Address> = current
            .iter()
            .map(|a| {
                let mut a = a.clone();
                if address.is_default {
                    a.is_default = false;
                }
                a
            })
            .collect();
        match updated.iter_mut().find(|a| a.id == address.id) {
            Some(existing) => *existing = address.clone(),
            None => updated.push(address.clone()),
        }

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::ADD_ADDRESS, json!({ "address": address }));
        self.resource.update(mutation, remote_operation).await
    }

    pub async fn remove<F, Fut>(&self, address_id: &str, remote_operation: F) -> AddressOutcome
    where
        F: FnOnce(Vec<Address>) -> Fut,
        Fut: Future<Output = Result<Vec<Address>, RemoteError>>,
    {
        let current = self.resource.visible();
        if !current.iter().any(|a| a.id == address_id) {
            return Ok(UpdateOutcome::Unchanged);
        }
        let updated: Vec<Address> = current.iter().filter(|a| a.id != address_id).cloned().collect();

        let mutation = Mutation::new(updated, current)
            .with_action(kinds::REMOVE_ADDRESS, json!({ "id": address_id }));
        self.resource.update(mutation, remote_operation).await
    }
}
