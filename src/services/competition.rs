use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::users::User;
use super::ServiceResult;
use crate::database::Transaction;
use crate::middleware::binder::FormInput;
use crate::middleware::pagination::{PaginationRequest, PaginationResult};
use crate::middleware::validators::alphanum_space;

/// State of a participation request. Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RegistrationStatus {
    Pending,
    Done,
    Rejected,
}

impl From<RegistrationStatus> for u8 {
    fn from(status: RegistrationStatus) -> u8 {
        match status {
            RegistrationStatus::Pending => 0,
            RegistrationStatus::Done => 1,
            RegistrationStatus::Rejected => 2,
        }
    }
}

impl TryFrom<u8> for RegistrationStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RegistrationStatus::Pending),
            1 => Ok(RegistrationStatus::Done),
            2 => Ok(RegistrationStatus::Rejected),
            other => Err(format!("invalid registration status {}", other)),
        }
    }
}

impl RegistrationStatus {
    /// Value of the `?status=` filter
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RegistrationStatus::Pending),
            "done" => Some(RegistrationStatus::Done),
            "rejected" => Some(RegistrationStatus::Rejected),
            _ => None,
        }
    }
}

/// Review state of a submitted log file. Serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SubmissionStatus {
    ForReview,
    Done,
    Rejected,
}

impl From<SubmissionStatus> for u8 {
    fn from(status: SubmissionStatus) -> u8 {
        match status {
            SubmissionStatus::ForReview => 0,
            SubmissionStatus::Done => 1,
            SubmissionStatus::Rejected => 2,
        }
    }
}

impl TryFrom<u8> for SubmissionStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SubmissionStatus::ForReview),
            1 => Ok(SubmissionStatus::Done),
            2 => Ok(SubmissionStatus::Rejected),
            other => Err(format!("invalid submission status {}", other)),
        }
    }
}

impl SubmissionStatus {
    /// Value of the `?status=` filter; `pending` means awaiting review
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubmissionStatus::ForReview),
            "done" => Some(SubmissionStatus::Done),
            "rejected" => Some(SubmissionStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub competition: String,
    pub participant: String,
    pub creator: String,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub competition: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub owner: String,
    pub competition: String,
    pub circuit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFile {
    pub id: i64,
    pub competition: String,
    pub owner: String,
    pub creator: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub private: bool,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistrationCreate {
    #[validate(custom(function = "alphanum_space"))]
    pub participant: String,
}

impl FormInput for RegistrationCreate {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistrationUpdate {
    #[validate(range(min = 1, max = 2))]
    pub resolution: u8,
}

impl RegistrationUpdate {
    pub fn status(&self) -> RegistrationStatus {
        if self.resolution == 1 {
            RegistrationStatus::Done
        } else {
            RegistrationStatus::Rejected
        }
    }
}

impl FormInput for RegistrationUpdate {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LogSubmission {
    /// Defaults to the submitting user
    pub owner: Option<String>,
    pub description: Option<String>,
    pub private: Option<bool>,
}

impl FormInput for LogSubmission {}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmissionUpdate {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub score: f32,
    pub comments: Option<String>,
}

impl FormInput for SubmissionUpdate {}

/// Competition registrations, participants and scored log files.
#[async_trait]
pub trait CompetitionService: Send + Sync {
    async fn leaderboard(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        circuit: Option<&str>,
        owner: Option<&str>,
    ) -> ServiceResult<(Vec<LeaderboardEntry>, PaginationResult)>;

    async fn registrations(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        status: RegistrationStatus,
        user: &User,
    ) -> ServiceResult<(Vec<Registration>, PaginationResult)>;

    async fn apply(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Registration>;

    async fn resolve(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        resolution: RegistrationStatus,
        user: &User,
    ) -> ServiceResult<Registration>;

    async fn delete_registration(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Registration>;

    async fn participants(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        user: &User,
    ) -> ServiceResult<(Vec<Participant>, PaginationResult)>;

    async fn delete_participant(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Participant>;

    async fn create_log(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        submission: &LogSubmission,
        file_name: &str,
        contents: &[u8],
        user: &User,
    ) -> ServiceResult<LogFile>;

    async fn update_log(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        id: i64,
        update: &SubmissionUpdate,
        user: &User,
    ) -> ServiceResult<LogFile>;

    async fn remove_log(&self, tx: &mut dyn Transaction, competition: &str, id: i64, user: &User) -> ServiceResult<LogFile>;

    async fn get_log(&self, tx: &mut dyn Transaction, competition: &str, id: i64, user: &User) -> ServiceResult<LogFile>;

    /// URL the log file contents can be fetched from
    async fn log_download_url(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        id: i64,
        user: &User,
    ) -> ServiceResult<String>;

    async fn logs(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        owner: Option<&str>,
        status: SubmissionStatus,
        user: &User,
    ) -> ServiceResult<(Vec<LogFile>, PaginationResult)>;
}
