//! Login, registration and profile operations.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::RewardBackend;
use crate::error::{ApiError, ValidationError};
use crate::store::{SessionStore, StoreError};
use crate::types::{StoredUser, UserDetails};

#[derive(Error, Debug)]
pub enum AccountError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

pub struct Account {
    backend: Arc<dyn RewardBackend>,
    store: Arc<SessionStore>,
}

impl Account {
    pub fn new(backend: Arc<dyn RewardBackend>, store: Arc<SessionStore>) -> Self {
        Self { backend, store }
    }

    /// Logs in, replacing whatever session was stored before.
    pub async fn login(&self, username: &str, password: &str) -> Result<StoredUser, AccountError> {
        require(username, "Username")?;
        require(password, "Password")?;

        self.store.logout()?;
        let user = self.backend.login(username.trim(), password).await?;
        self.store.login(user.clone())?;
        Ok(user)
    }

    pub async fn register(&self, name: &str, username: &str, password: &str) -> Result<(), AccountError> {
        require(name, "Name")?;
        require(username, "Username")?;
        require(password, "Password")?;

        self.backend.register(name.trim(), username.trim(), password).await?;
        tracing::info!("Registered account {}", username.trim());
        Ok(())
    }

    pub fn logout(&self) -> Result<(), AccountError> {
        Ok(self.store.logout()?)
    }

    /// Fetches the logged-in user's details and refreshes the cached balance.
    pub async fn profile(&self) -> Result<UserDetails, AccountError> {
        let user = self.store.require_user()?;
        self.store.record_activity();
        let details = self.backend.user_details(user.user_id).await?;
        self.store.apply_details(&details)?;
        Ok(details)
    }
}
