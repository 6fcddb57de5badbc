use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque backend identifier of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A claim for reward coins against one point-of-sale receipt.
///
/// This is also the exact shape of the QR payload shown to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClaimRequest {
    pub terminal_id: String,
    pub pos_no: String,
    pub user_id: UserId,
}

impl ClaimRequest {
    pub fn new(terminal_id: impl Into<String>, pos_no: impl Into<String>, user_id: UserId) -> Self {
        Self { terminal_id: terminal_id.into(), pos_no: pos_no.into(), user_id }
    }

    pub fn key(&self) -> ClaimKey {
        ClaimKey { terminal_id: self.terminal_id.clone(), pos_no: self.pos_no.clone() }
    }
}

/// Identity used to match status polls and push events to a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimKey {
    pub terminal_id: String,
    pub pos_no: String,
}

impl ClaimKey {
    pub fn matches(&self, terminal_id: &str, pos_no: &str) -> bool {
        self.terminal_id == terminal_id && self.pos_no == pos_no
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminal {} / SI {}", self.terminal_id, self.pos_no)
    }
}

/// Voucher or claim receipt. Display payload only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "GC_Code", alias = "code")]
    pub code: String,
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "ItemName", alias = "itemName")]
    pub item_name: String,
    #[serde(rename = "Date", alias = "date", deserialize_with = "receipt_date")]
    pub date: DateTime<Utc>,
}

/// `GET /user/details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDetails {
    #[serde(rename = "UserId")]
    pub user_id: UserId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CoinsEarned", default)]
    pub coins_earned: u64,
    #[serde(rename = "UserPoints", default)]
    pub user_points: u64,
    /// `None` when the backend has no value; only `Some(false)` owes a celebration.
    #[serde(rename = "isCongratulatedSilver", default, deserialize_with = "optional_flag")]
    pub congratulated_silver: Option<bool>,
    #[serde(rename = "isCongratulatedGold", default, deserialize_with = "optional_flag")]
    pub congratulated_gold: Option<bool>,
}

/// The persisted `user` record returned by login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    #[serde(rename = "UserId")]
    pub user_id: UserId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CoinsEarned", default)]
    pub coins_earned: u64,
    #[serde(rename = "CustomerNo", default, skip_serializing_if = "Option::is_none")]
    pub customer_no: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user: StoredUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outlet {
    #[serde(rename = "OutletId")]
    pub outlet_id: u64,
    #[serde(rename = "Outlets")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(rename = "Item_Id")]
    pub item_id: u64,
    #[serde(rename = "Item_Name")]
    pub item_name: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Photo_Link", default)]
    pub photo_link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub user_id: UserId,
    pub item_name: String,
    pub price: f64,
    pub quantity: u32,
    pub customer_no: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemResponse {
    pub message: String,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// `GET /reward/claimStatus`
///
/// Only `claimed` is guaranteed; `rejected`, `message` and `receipt` are
/// honoured when the backend sends them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimStatus {
    #[serde(default, deserialize_with = "flag")]
    pub claimed: bool,
    #[serde(default, deserialize_with = "flag")]
    pub rejected: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CongratulationUpdate {
    pub user_id: UserId,
    pub is_congratulated_silver: bool,
    pub is_congratulated_gold: bool,
}

/// Payload of the `claimSuccess` push event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSuccessEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub terminal_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub pos_no: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

// SQL `bit` columns arrive as true/false, 0/1 or null depending on the driver.
fn optional_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.as_u64().unwrap_or(0) != 0)),
        Some(other) => Err(serde::de::Error::custom(format!("expected a flag, got {}", other))),
    }
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(optional_flag(d)?.unwrap_or(false))
}

const NAIVE_DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339, or a timestamp without offset read as UTC, or a bare date.
pub fn parse_receipt_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn receipt_date<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let text = String::deserialize(d)?;
    parse_receipt_date(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised receipt date {:?}", text)))
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected a string or number, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_details_keeps_null_flags_apart_from_false() {
        let json = r#"{"UserId":7,"Name":"Jane","CoinsEarned":120,"UserPoints":520,
            "isCongratulatedSilver":0,"isCongratulatedGold":null}"#;
        let details: UserDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.user_id, UserId(7));
        assert_eq!(details.user_points, 520);
        assert_eq!(details.congratulated_silver, Some(false));
        assert_eq!(details.congratulated_gold, None);

        let json = r#"{"UserId":7,"Name":"Jane","isCongratulatedSilver":true}"#;
        let details: UserDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.congratulated_silver, Some(true));
        assert_eq!(details.congratulated_gold, None);
    }

    #[test]
    fn stored_user_keeps_unknown_fields() {
        let json = r#"{"UserId":3,"Name":"Ann","CoinsEarned":40,"CustomerNo":"C-1","Username":"ann"}"#;
        let user: StoredUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.customer_no, Some(serde_json::json!("C-1")));
        assert_eq!(user.extra.get("Username"), Some(&serde_json::json!("ann")));

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["Username"], "ann");
    }

    #[test]
    fn push_event_terminal_may_be_numeric() {
        let json = r#"{"terminalId":3,"posNo":"INV-1001","message":"ok"}"#;
        let event: ClaimSuccessEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.terminal_id, "3");
        assert!(ClaimKey { terminal_id: "3".into(), pos_no: "INV-1001".into() }
            .matches(&event.terminal_id, &event.pos_no));
    }

    #[test]
    fn receipt_accepts_backend_and_camel_case_names() {
        let backend = r#"{"GC_Code":"GC-9","Name":"Jane","ItemName":"Voucher","Date":"2024-05-01T10:00:00Z"}"#;
        let camel = r#"{"code":"GC-9","name":"Jane","itemName":"Voucher","date":"2024-05-01T10:00:00Z"}"#;
        let a: Receipt = serde_json::from_str(backend).unwrap();
        let b: Receipt = serde_json::from_str(camel).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn receipt_dates_without_offset_are_utc() {
        let expected = parse_receipt_date("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(parse_receipt_date("2024-05-01 10:00:00"), Some(expected));
        assert_eq!(parse_receipt_date("2024-05-01T10:00:00.000"), Some(expected));
        assert_eq!(parse_receipt_date("2024-05-01T18:00:00+08:00"), Some(expected));
        assert_eq!(parse_receipt_date("2024-05-01").unwrap().to_rfc3339(), "2024-05-01T00:00:00+00:00");
        assert_eq!(parse_receipt_date("May 1st"), None);
    }

    #[test]
    fn redeem_response_with_local_receipt_date_parses() {
        let json = r#"{"message":"Redeemed","receipt":{"GC_Code":"GC-3","Name":"Jane",
            "ItemName":"Kopi","Date":"2024-05-01 10:00:00"}}"#;
        let response: RedeemResponse = serde_json::from_str(json).unwrap();
        let receipt = response.receipt.unwrap();
        assert_eq!(receipt.code, "GC-3");
        assert_eq!(receipt.date.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
