//! Reward backend contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::ApiError;
use crate::types::{
    ClaimKey, ClaimRequest, ClaimStatus, CongratulationUpdate, LoginRequest, LoginResponse,
    MenuItem, MessageResponse, Outlet, Receipt, RedeemRequest, RedeemResponse, RegisterRequest,
    StoredUser, UserDetails, UserId,
};

/// Every remote operation the client depends on.
#[async_trait]
pub trait RewardBackend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<StoredUser, ApiError>;

    async fn register(&self, name: &str, username: &str, password: &str) -> Result<(), ApiError>;

    async fn user_details(&self, user_id: UserId) -> Result<UserDetails, ApiError>;

    async fn food_outlets(&self) -> Result<Vec<Outlet>, ApiError>;

    async fn activity_outlets(&self) -> Result<Vec<Outlet>, ApiError>;

    async fn menus(&self, outlet_id: u64) -> Result<Vec<MenuItem>, ApiError>;

    async fn redeem(&self, request: &RedeemRequest) -> Result<RedeemResponse, ApiError>;

    async fn redeemed_items(&self, user_id: UserId) -> Result<Vec<Receipt>, ApiError>;

    /// Confirms a claim on behalf of a supervisor. Returns the backend message.
    async fn claim(&self, request: &ClaimRequest) -> Result<String, ApiError>;

    async fn claim_status(&self, key: &ClaimKey) -> Result<ClaimStatus, ApiError>;

    async fn update_congratulation_status(&self, update: &CongratulationUpdate) -> Result<(), ApiError>;
}

pub struct HttpBackend {
    client: Client,
    api_url: String,
    catalog_url: String,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            catalog_url: config.catalog_url().trim_end_matches('/').to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn catalog(&self, path: &str) -> String {
        format!("{}{}", self.catalog_url, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), ApiError> {
        check(request.send().await?).await?;
        Ok(())
    }
}

/// Maps non-2xx responses: 4xx with a message is a business rejection.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), body))
}

pub(crate) fn classify_failure(status: u16, body: String) -> ApiError {
    if (400..500).contains(&status) {
        if let Some(message) = rejection_message(&body) {
            return ApiError::Rejected { status, message };
        }
    }
    ApiError::Server { status, body }
}

fn rejection_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[async_trait]
impl RewardBackend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<StoredUser, ApiError> {
        let body = LoginRequest { username, password };
        let response: LoginResponse = self.fetch(self.client.post(self.api("/auth/login")).json(&body)).await?;
        Ok(response.user)
    }

    async fn register(&self, name: &str, username: &str, password: &str) -> Result<(), ApiError> {
        let body = RegisterRequest { name, username, password };
        self.execute(self.client.post(self.api("/auth/register")).json(&body)).await
    }

    async fn user_details(&self, user_id: UserId) -> Result<UserDetails, ApiError> {
        let request = self.client
            .get(self.api("/user/details"))
            .query(&[("userId", user_id.to_string())]);
        self.fetch(request).await
    }

    async fn food_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.fetch(self.client.get(self.catalog("/catalog/getFoodOutlets"))).await
    }

    async fn activity_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.fetch(self.client.get(self.catalog("/catalog/getActivityOutlets"))).await
    }

    async fn menus(&self, outlet_id: u64) -> Result<Vec<MenuItem>, ApiError> {
        let request = self.client
            .get(self.catalog("/catalog/getFoodMenus"))
            .query(&[("outletId", outlet_id.to_string())]);
        self.fetch(request).await
    }

    async fn redeem(&self, request: &RedeemRequest) -> Result<RedeemResponse, ApiError> {
        self.fetch(self.client.post(self.api("/reward/redeem")).json(request)).await
    }

    async fn redeemed_items(&self, user_id: UserId) -> Result<Vec<Receipt>, ApiError> {
        self.fetch(self.client.get(self.api(&format!("/reward/redeemedCoins/{}", user_id)))).await
    }

    async fn claim(&self, request: &ClaimRequest) -> Result<String, ApiError> {
        let response: MessageResponse = self.fetch(self.client.post(self.api("/reward/claim")).json(request)).await?;
        Ok(response.message)
    }

    async fn claim_status(&self, key: &ClaimKey) -> Result<ClaimStatus, ApiError> {
        let request = self.client
            .get(self.api("/reward/claimStatus"))
            .query(&[("terminalId", key.terminal_id.as_str()), ("posNo", key.pos_no.as_str())]);
        self.fetch(request).await
    }

    async fn update_congratulation_status(&self, update: &CongratulationUpdate) -> Result<(), ApiError> {
        self.execute(self.client.post(self.api("/reward/updateCongratulationStatus")).json(update)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_with_message_are_rejections() {
        let err = classify_failure(409, r#"{"message":"Receipt already claimed"}"#.into());
        assert!(matches!(err, ApiError::Rejected { status: 409, ref message } if message == "Receipt already claimed"));
        assert_eq!(err.to_string(), "Receipt already claimed");

        let err = classify_failure(400, r#"{"error":"Invalid SI No"}"#.into());
        assert!(err.is_rejection());
    }

    #[test]
    fn other_failures_are_server_errors() {
        assert!(matches!(classify_failure(500, r#"{"message":"boom"}"#.into()), ApiError::Server { status: 500, .. }));
        assert!(matches!(classify_failure(404, "<html>".into()), ApiError::Server { status: 404, .. }));
    }
}
