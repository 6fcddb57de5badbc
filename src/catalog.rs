//! Outlets, menus and coin redemption.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::RewardBackend;
use crate::error::ApiError;
use crate::store::{SessionStore, StoreError};
use crate::types::{MenuItem, Outlet, Receipt, RedeemRequest};

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Not enough Kai Coins: {required} needed, {available} available")]
    InsufficientCoins { required: u64, available: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Coins charged for one unit: the price rounded up to the next hundred.
pub fn coins_per_unit(price: f64) -> u64 {
    if price <= 0.0 {
        return 0;
    }
    ((price / 100.0).ceil() as u64) * 100
}

pub fn redemption_cost(price: f64, quantity: u32) -> u64 {
    coins_per_unit(price) * u64::from(quantity)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub message: String,
    pub receipt: Option<Receipt>,
    /// Balance after the post-redemption refresh, if that refresh succeeded.
    pub coins_remaining: Option<u64>,
}

pub struct Catalog {
    backend: Arc<dyn RewardBackend>,
    store: Arc<SessionStore>,
}

impl Catalog {
    pub fn new(backend: Arc<dyn RewardBackend>, store: Arc<SessionStore>) -> Self {
        Self { backend, store }
    }

    pub async fn food_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.store.record_activity();
        self.backend.food_outlets().await
    }

    pub async fn activity_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.store.record_activity();
        self.backend.activity_outlets().await
    }

    pub async fn menus(&self, outlet_id: u64) -> Result<Vec<MenuItem>, ApiError> {
        self.store.record_activity();
        self.backend.menus(outlet_id).await
    }

    /// Redeems `quantity` units of `item` against the cached coin balance.
    ///
    /// A short balance is refused locally. After a successful redemption the
    /// balance is re-read from the backend.
    pub async fn redeem(&self, item: &MenuItem, quantity: u32) -> Result<Redemption, RedeemError> {
        if quantity == 0 {
            return Err(RedeemError::InvalidQuantity);
        }
        let user = self.store.require_user()?;
        self.store.record_activity();

        let required = redemption_cost(item.price, quantity);
        if required > user.coins_earned {
            tracing::info!(
                "Redemption of {} x{} refused: {} coins needed, {} available",
                item.item_name, quantity, required, user.coins_earned
            );
            return Err(RedeemError::InsufficientCoins { required, available: user.coins_earned });
        }

        let request = RedeemRequest {
            user_id: user.user_id,
            item_name: item.item_name.clone(),
            price: item.price,
            quantity,
            customer_no: user.customer_no.clone(),
        };
        let response = self.backend.redeem(&request).await?;
        tracing::info!("Redeemed {} x{} for {} coins", item.item_name, quantity, required);

        let coins_remaining = match self.backend.user_details(user.user_id).await {
            Ok(details) => {
                self.store.apply_details(&details)?;
                Some(details.coins_earned)
            }
            Err(e) => {
                tracing::warn!("Balance refresh after redemption failed: {}", e);
                None
            }
        };

        Ok(Redemption { message: response.message, receipt: response.receipt, coins_remaining })
    }

    pub async fn redeemed_items(&self) -> Result<Vec<Receipt>, RedeemError> {
        let user = self.store.require_user()?;
        self.store.record_activity();
        Ok(self.backend.redeemed_items(user.user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBackend;
    use crate::types::{StoredUser, UserId};

    fn item(price: f64) -> MenuItem {
        MenuItem { item_id: 7, item_name: "Latte".into(), price, photo_link: None }
    }

    fn catalog_with(coins: u64) -> (Arc<FakeBackend>, Catalog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let user = StoredUser {
            user_id: UserId(42),
            name: "Jane".into(),
            coins_earned: coins,
            customer_no: Some(serde_json::json!("C-77")),
            extra: Default::default(),
        };
        let backend = Arc::new(FakeBackend::new().with_account("jane", "pw", user.clone(), 0));
        let store = Arc::new(SessionStore::open(dir.path().join("s.json")).unwrap());
        store.login(user).unwrap();
        (Arc::clone(&backend), Catalog::new(backend, store), dir)
    }

    #[test]
    fn cost_rounds_up_to_hundreds() {
        assert_eq!(coins_per_unit(250.0), 300);
        assert_eq!(coins_per_unit(300.0), 300);
        assert_eq!(coins_per_unit(0.5), 100);
        assert_eq!(redemption_cost(150.0, 3), 600);
    }

    #[tokio::test]
    async fn short_balance_makes_no_network_call() {
        let (backend, catalog, _dir) = catalog_with(250);
        let err = catalog.redeem(&item(250.0), 1).await.unwrap_err();
        assert!(matches!(err, RedeemError::InsufficientCoins { required: 300, available: 250 }));
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn redemption_refreshes_the_balance() {
        let (_backend, catalog, _dir) = catalog_with(1000);
        let redemption = catalog.redeem(&item(250.0), 2).await.unwrap();
        assert_eq!(redemption.coins_remaining, Some(400));
        assert_eq!(redemption.receipt.unwrap().item_name, "Latte");
        assert_eq!(catalog.redeemed_items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_is_refused() {
        let (backend, catalog, _dir) = catalog_with(1000);
        assert!(matches!(catalog.redeem(&item(10.0), 0).await, Err(RedeemError::InvalidQuantity)));
        assert_eq!(backend.total_calls(), 0);
    }
}
