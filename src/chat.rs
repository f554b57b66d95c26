use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use teloxide::types::ChatId;
use tokio::sync::Mutex;

lazy_static! {
    // Czech number: +420 followed by nine digits
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+420[0-9]{9}$").unwrap();
}

/// Dialogue position of one chat. Held in memory only; a restart sends
/// everybody back through `/start`.
#[derive(Debug, Clone)]
pub enum UserState {
    /// The welcome text has been sent, waiting for a phone number.
    AwaitingPhone,
    /// Phone accepted, prefix already stripped.
    Registered { phone: String },
}

pub type ChatStates = Arc<Mutex<HashMap<ChatId, UserState>>>;

/// Validates a Czech phone number and strips the `+420` prefix, returning
/// the nine digits the upstream expects.
pub fn parse_phone(input: &str) -> Option<String> {
    let input = input.trim();
    if PHONE_REGEX.is_match(input) {
        Some(input.trim_start_matches("+420").to_owned())
    } else {
        None
    }
}
