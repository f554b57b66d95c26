use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub const BASE_URL: &str = "https://api.nutritionpro.eu";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("login rejected with status {status}: {body}")]
    Auth { status: StatusCode, body: String },
    #[error("menu request failed with status {status}: {body}")]
    Fetch { status: StatusCode, body: String },
    #[error("failed to reach upstream: {0}")]
    Io(#[from] reqwest::Error),
    #[error("invalid upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Meal slots of the upstream menu. The wire values appear verbatim in the
/// `meal` field of dish records; 1 and 3 are reserved by the upstream and
/// never produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MealKind {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealKind {
    pub const ALL: [MealKind; 3] = [MealKind::Breakfast, MealKind::Lunch, MealKind::Dinner];

    pub fn wire(self) -> u8 {
        match self {
            MealKind::Breakfast => 0,
            MealKind::Lunch => 2,
            MealKind::Dinner => 4,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MealKind::Breakfast),
            2 => Some(MealKind::Lunch),
            4 => Some(MealKind::Dinner),
            _ => None,
        }
    }
}

/// User-scoped response of `GET /api/menu/me`. Only `days` is consumed; the
/// remaining fields are delivery metadata kept for completeness.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuResponse {
    pub id: String,
    pub status: String,
    pub name: String,
    pub current_week_day: i64,
    pub days: Vec<Day>,
    pub start_date: String,
    pub end_date: String,
    pub length: i64,
    pub size: String,
    pub meals_per_day: i64,
    pub class_menu: String,
    pub address: String,
    pub energy: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Day {
    /// Unix seconds, aligned to 00:00 local time by the upstream.
    pub timestamp: i64,
    pub dishes: Vec<Dish>,
    #[serde(default)]
    pub nutrients: Nutrients,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dish {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Raw wire value, see [`MealKind`].
    pub meal: u8,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub is_hot: bool,
    #[serde(default)]
    pub nutrients: Nutrients,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub dmu_id: String,
    #[serde(default)]
    pub is_choiced: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Nutrients {
    pub kcal: f64,
    pub prot: f64,
    pub fat: f64,
    pub carb: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

/// Authenticated client for the meal service. Single-tenant: one instance is
/// bound to the phone number it logged in with. The bearer token is obtained
/// once at construction and never refreshed; a client whose token expired is
/// discarded and rebuilt by the caller.
#[derive(Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl UpstreamClient {
    /// Exchanges a phone number for a bearer token against the production
    /// upstream. Fails with [`Error::Auth`] on any non-2xx login response.
    pub async fn login(phone: &str) -> Result<Self, Error> {
        Self::login_at(BASE_URL, phone).await
    }

    pub(crate) async fn login_at(base_url: &str, phone: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let response = http
            .put(format!("{base_url}/api/menu/rate/login"))
            .header(ACCEPT, "*/*")
            .json(&json!({ "inBodyId": phone }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Auth { status, body });
        }

        let login: LoginResponse = serde_json::from_str(&body)?;

        Ok(Self {
            http,
            base_url: base_url.to_owned(),
            token: login.access_token,
        })
    }

    pub async fn get_menu(&self) -> Result<MenuResponse, Error> {
        let response = self
            .http
            .get(format!("{}/api/menu/me", self.base_url))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Fetch { status, body });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
