//! In-memory [`RewardBackend`] for tests and offline demos.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::RewardBackend;
use crate::catalog::redemption_cost;
use crate::error::ApiError;
use crate::types::{
    ClaimKey, ClaimRequest, ClaimStatus, CongratulationUpdate, MenuItem, Outlet, Receipt,
    RedeemRequest, RedeemResponse, StoredUser, UserDetails, UserId,
};

/// Scripted answer for one `claimStatus` poll.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Pending,
    Claimed { message: Option<String>, receipt: Option<Receipt> },
    Rejected(String),
    /// The poll fails as if the backend were unreachable.
    Unavailable,
}

#[derive(Default)]
pub struct FakeBackend {
    pub accounts: Mutex<HashMap<String, (String, StoredUser)>>,
    pub details: Mutex<HashMap<UserId, UserDetails>>,
    pub food_outlets: Mutex<Vec<Outlet>>,
    pub activity_outlets: Mutex<Vec<Outlet>>,
    pub menus: Mutex<HashMap<u64, Vec<MenuItem>>>,
    pub redeemed: Mutex<Vec<Receipt>>,
    pub status_script: Mutex<VecDeque<StatusReply>>,
    pub claimed: Mutex<HashSet<ClaimKey>>,
    pub congratulation_updates: Mutex<Vec<CongratulationUpdate>>,
    /// Every backend call, including failed ones.
    pub calls: AtomicU64,
    pub status_calls: AtomicU64,
    pub claim_calls: AtomicU64,
    /// Number of upcoming `user_details` calls that fail.
    pub details_failures: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable() -> ApiError {
    ApiError::Server { status: 503, body: "unavailable".to_string() }
}

fn rejected(status: u16, message: &str) -> ApiError {
    ApiError::Rejected { status, message: message.to_string() }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, username: &str, password: &str, user: StoredUser, points: u64) -> Self {
        let details = UserDetails {
            user_id: user.user_id,
            name: user.name.clone(),
            coins_earned: user.coins_earned,
            user_points: points,
            congratulated_silver: Some(false),
            congratulated_gold: Some(false),
        };
        lock(&self.details).insert(user.user_id, details);
        lock(&self.accounts).insert(username.to_string(), (password.to_string(), user));
        self
    }

    pub fn set_details(&self, details: UserDetails) {
        lock(&self.details).insert(details.user_id, details);
    }

    pub fn details_of(&self, user_id: UserId) -> Option<UserDetails> {
        lock(&self.details).get(&user_id).cloned()
    }

    pub fn script_status(&self, replies: impl IntoIterator<Item = StatusReply>) {
        lock(&self.status_script).extend(replies);
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RewardBackend for FakeBackend {
    async fn login(&self, username: &str, password: &str) -> Result<StoredUser, ApiError> {
        self.called();
        match lock(&self.accounts).get(username) {
            Some((expected, user)) if expected == password => Ok(user.clone()),
            _ => Err(rejected(401, "Invalid username or password")),
        }
    }

    async fn register(&self, name: &str, username: &str, password: &str) -> Result<(), ApiError> {
        self.called();
        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(username) {
            return Err(rejected(409, "Username already taken"));
        }
        let user_id = UserId(accounts.len() as u64 + 1000);
        let user = StoredUser {
            user_id,
            name: name.to_string(),
            coins_earned: 0,
            customer_no: None,
            extra: Default::default(),
        };
        accounts.insert(username.to_string(), (password.to_string(), user));
        lock(&self.details).insert(user_id, UserDetails {
            user_id,
            name: name.to_string(),
            coins_earned: 0,
            user_points: 0,
            congratulated_silver: Some(false),
            congratulated_gold: Some(false),
        });
        Ok(())
    }

    async fn user_details(&self, user_id: UserId) -> Result<UserDetails, ApiError> {
        self.called();
        let pending_failures = self.details_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.details_failures.store(pending_failures - 1, Ordering::SeqCst);
            return Err(unavailable());
        }
        lock(&self.details)
            .get(&user_id)
            .cloned()
            .ok_or_else(|| rejected(404, "User not found"))
    }

    async fn food_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.called();
        Ok(lock(&self.food_outlets).clone())
    }

    async fn activity_outlets(&self) -> Result<Vec<Outlet>, ApiError> {
        self.called();
        Ok(lock(&self.activity_outlets).clone())
    }

    async fn menus(&self, outlet_id: u64) -> Result<Vec<MenuItem>, ApiError> {
        self.called();
        Ok(lock(&self.menus).get(&outlet_id).cloned().unwrap_or_default())
    }

    async fn redeem(&self, request: &RedeemRequest) -> Result<RedeemResponse, ApiError> {
        self.called();
        let cost = redemption_cost(request.price, request.quantity);
        let mut details = lock(&self.details);
        let user = details.get_mut(&request.user_id).ok_or_else(|| rejected(404, "User not found"))?;
        if user.coins_earned < cost {
            return Err(rejected(400, "Insufficient coins"));
        }
        user.coins_earned -= cost;

        let mut redeemed = lock(&self.redeemed);
        let receipt = Receipt {
            code: format!("GC-{}", redeemed.len() + 1),
            name: user.name.clone(),
            item_name: request.item_name.clone(),
            date: Utc::now(),
        };
        redeemed.push(receipt.clone());
        Ok(RedeemResponse { message: format!("Redeemed {} x{}", request.item_name, request.quantity), receipt: Some(receipt) })
    }

    async fn redeemed_items(&self, _user_id: UserId) -> Result<Vec<Receipt>, ApiError> {
        self.called();
        Ok(lock(&self.redeemed).clone())
    }

    async fn claim(&self, request: &ClaimRequest) -> Result<String, ApiError> {
        self.called();
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if !lock(&self.claimed).insert(request.key()) {
            return Err(rejected(409, "Receipt already claimed"));
        }
        Ok("Kai Coins credited".to_string())
    }

    async fn claim_status(&self, key: &ClaimKey) -> Result<ClaimStatus, ApiError> {
        self.called();
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = lock(&self.status_script).pop_front();
        match reply {
            Some(StatusReply::Pending) => Ok(ClaimStatus::default()),
            Some(StatusReply::Claimed { message, receipt }) => Ok(ClaimStatus { claimed: true, message, receipt, ..ClaimStatus::default() }),
            Some(StatusReply::Rejected(message)) => Ok(ClaimStatus { rejected: true, message: Some(message), ..ClaimStatus::default() }),
            Some(StatusReply::Unavailable) => Err(unavailable()),
            None => Ok(ClaimStatus { claimed: lock(&self.claimed).contains(key), ..ClaimStatus::default() }),
        }
    }

    async fn update_congratulation_status(&self, update: &CongratulationUpdate) -> Result<(), ApiError> {
        self.called();
        if let Some(details) = lock(&self.details).get_mut(&update.user_id) {
            details.congratulated_silver = Some(update.is_congratulated_silver);
            details.congratulated_gold = Some(update.is_congratulated_gold);
        }
        lock(&self.congratulation_updates).push(update.clone());
        Ok(())
    }
}
