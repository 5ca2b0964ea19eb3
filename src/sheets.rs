//! Remote row source backed by the Google Sheets values API.
//!
//! Every data category reads a fixed range from one workbook; the `User` tab
//! doubles as the account store. Cell values come back as JSON scalars and are
//! flattened to strings here, so everything downstream only ever sees
//! `Vec<Vec<String>>`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const USER_RANGE: &str = "User!A2:D";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;

#[derive(thiserror::Error, Debug)]
pub enum SheetsError {
    #[error("request to sheets API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("username already taken")]
    UsernameTaken,

    #[error("user not found")]
    UserNotFound,
}

/// A registered user as stored on the `User` tab:
/// id, username, password hash, email.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: u32,
    pub username: String,
    pub password_hash: String,
    pub email: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Turn a JSON cell scalar into its string form. Unformatted reads return
/// numbers and booleans; nulls and holes become the empty string.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct SheetsClient {
    http: reqwest::Client,
    base: String,
    sheet_id: String,
    api_key: String,
}

impl SheetsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: SHEETS_BASE.to_string(),
            sheet_id: config.sheet_id.clone(),
            api_key: config.google_api_key.clone(),
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/{}/values/{}", self.base, self.sheet_id, range)
    }

    async fn get_values_once(
        &self,
        range: &str,
        unformatted: bool,
    ) -> Result<ValueRange, SheetsError> {
        let mut request = self
            .http
            .get(self.values_url(range))
            .query(&[("key", self.api_key.as_str())]);
        if unformatted {
            request = request.query(&[("valueRenderOption", "UNFORMATTED_VALUE")]);
        }
        let body = request
            .send()
            .await?
            .error_for_status()?
            .json::<ValueRange>()
            .await?;
        Ok(body)
    }

    async fn get_values(&self, range: &str, unformatted: bool) -> Result<ValueRange, SheetsError> {
        let mut attempts = 0;
        loop {
            match self.get_values_once(range, unformatted).await {
                Ok(body) => return Ok(body),
                Err(e) if attempts < MAX_RETRIES && is_transient(&e) => {
                    attempts += 1;
                    let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempts - 1);
                    warn!(range, attempt = attempts, delay_ms = backoff, error = %e, "Retrying sheets read");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a range as formatted strings. An absent `values` field means the
    /// range is empty, not that the call failed.
    pub async fn fetch_rows(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let body = self.get_values(range, false).await?;
        debug!(range, rows = body.values.len(), "Fetched sheet range");
        Ok(flatten(body))
    }

    /// Fetch a range with raw (unformatted) cell values, for tabs where the
    /// display format would mangle numbers.
    pub async fn fetch_rows_unformatted(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let body = self.get_values(range, true).await?;
        debug!(range, rows = body.values.len(), "Fetched sheet range (unformatted)");
        Ok(flatten(body))
    }

    async fn put_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), SheetsError> {
        self.http
            .put(self.values_url(range))
            .query(&[
                ("key", self.api_key.as_str()),
                ("valueInputOption", "RAW"),
            ])
            .json(&json!({ "values": values }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn append_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), SheetsError> {
        self.http
            .post(format!("{}:append", self.values_url(range)))
            .query(&[
                ("key", self.api_key.as_str()),
                ("valueInputOption", "RAW"),
            ])
            .json(&json!({ "values": values }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn user_rows(&self) -> Result<Vec<Vec<String>>, SheetsError> {
        self.fetch_rows(USER_RANGE).await
    }

    pub async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, SheetsError> {
        let rows = self.user_rows().await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_user_row(row))
            .find(|u| u.username.eq_ignore_ascii_case(username)))
    }

    pub async fn user_by_id(&self, id: u32) -> Result<Option<UserRecord>, SheetsError> {
        let rows = self.user_rows().await?;
        Ok(find_user_by_id(&rows, id))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, SheetsError> {
        let rows = self.user_rows().await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_user_row(row))
            .find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    /// Append a new user row, assigning the next id after the current maximum.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        email: &str,
    ) -> Result<UserRecord, SheetsError> {
        let rows = self.user_rows().await?;
        if rows
            .iter()
            .filter_map(|row| parse_user_row(row))
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            return Err(SheetsError::UsernameTaken);
        }

        let next_id = rows
            .iter()
            .filter_map(|row| parse_user_row(row))
            .map(|u| u.id)
            .max()
            .unwrap_or(0)
            + 1;

        let user = UserRecord {
            id: next_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            email: email.to_string(),
        };

        self.append_values(
            "User!A:D",
            vec![vec![
                user.id.to_string(),
                user.username.clone(),
                user.password_hash.clone(),
                user.email.clone(),
            ]],
        )
        .await?;

        Ok(user)
    }

    /// Overwrite the password hash cell of an existing user's row.
    pub async fn update_user_password(
        &self,
        user_id: u32,
        new_hash: &str,
    ) -> Result<(), SheetsError> {
        let rows = self.user_rows().await?;
        let index = rows
            .iter()
            .position(|row| {
                parse_user_row(row).map(|u| u.id) == Some(user_id)
            })
            .ok_or(SheetsError::UserNotFound)?;

        // Rows start at sheet row 2; the hash lives in column C.
        let range = format!("User!C{}", index + 2);
        self.put_values(&range, vec![vec![new_hash.to_string()]]).await
    }
}

/// Only transient failures are worth retrying: a 4xx (bad API key, bad
/// range) will not get better with backoff.
fn is_transient(error: &SheetsError) -> bool {
    match error {
        SheetsError::Http(e) => status_is_transient(e.status()),
        _ => false,
    }
}

fn status_is_transient(status: Option<reqwest::StatusCode>) -> bool {
    !status.is_some_and(|s| s.is_client_error())
}

fn flatten(body: ValueRange) -> Vec<Vec<String>> {
    body.values
        .into_iter()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect()
}

fn find_user_by_id(rows: &[Vec<String>], id: u32) -> Option<UserRecord> {
    rows.iter()
        .filter_map(|row| parse_user_row(row))
        .find(|u| u.id == id)
}

fn parse_user_row(row: &[String]) -> Option<UserRecord> {
    let id = row.first()?.trim().parse().ok()?;
    Some(UserRecord {
        id,
        username: row.get(1).cloned().unwrap_or_default(),
        password_hash: row.get(2).cloned().unwrap_or_default(),
        email: row.get(3).cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_scalars_flatten_to_strings() {
        assert_eq!(cell_to_string(&json!("B-101")), "B-101");
        assert_eq!(cell_to_string(&json!(12)), "12");
        assert_eq!(cell_to_string(&json!(4.5)), "4.5");
        assert_eq!(cell_to_string(&json!(true)), "true");
        assert_eq!(cell_to_string(&Value::Null), "");
    }

    #[test]
    fn missing_values_field_means_empty_sheet() {
        let body: ValueRange = serde_json::from_str(r#"{"range": "Data1!A2:Y"}"#).unwrap();
        assert!(flatten(body).is_empty());
    }

    #[test]
    fn value_range_rows_flatten_raggedly() {
        let body: ValueRange =
            serde_json::from_str(r#"{"values": [["B-1", 2, null], ["B-2"]]}"#).unwrap();
        let rows = flatten(body);
        assert_eq!(rows[0], vec!["B-1", "2", ""]);
        assert_eq!(rows[1], vec!["B-2"]);
    }

    #[test]
    fn user_rows_parse_and_skip_bad_ids() {
        let rows = vec![
            vec!["1".into(), "alice".into(), "hash-a".into(), "a@x.com".into()],
            vec!["".into(), "ghost".into()],
            vec!["7".into(), "bob".into(), "hash-b".into(), "b@x.com".into()],
        ];
        let users: Vec<UserRecord> = rows.iter().filter_map(|r| parse_user_row(r)).collect();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].id, 7);
        assert_eq!(users[1].email, "b@x.com");
    }

    #[test]
    fn id_lookup_finds_the_matching_row() {
        let rows = vec![
            vec!["1".into(), "alice".into(), "hash-a".into(), "a@x.com".into()],
            vec!["".into(), "ghost".into()],
            vec!["7".into(), "bob".into(), "hash-b".into(), "b@x.com".into()],
        ];
        let user = find_user_by_id(&rows, 7).unwrap();
        assert_eq!(user.username, "bob");
        assert!(find_user_by_id(&rows, 2).is_none());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!status_is_transient(Some(reqwest::StatusCode::FORBIDDEN)));
        assert!(!status_is_transient(Some(reqwest::StatusCode::BAD_REQUEST)));
        assert!(status_is_transient(Some(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        )));
        assert!(status_is_transient(Some(
            reqwest::StatusCode::SERVICE_UNAVAILABLE
        )));
        // Connection-level failures carry no status and stay retryable.
        assert!(status_is_transient(None));
    }
}
