use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PASSING_SCORE: i64 = 70;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Failed,
    Expired,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Failed => "failed",
            EnrollmentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnrollmentStatus::Active)
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProgressStatus {
    Locked,
    Unlocked,
    InProgress,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Locked => "locked",
            ProgressStatus::Unlocked => "unlocked",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Questionnaire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Worker {
    pub id: i64,
    pub company_id: i64,
    pub full_name: String,
    pub years_experience: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CourseLevel {
    pub id: i64,
    pub course_id: i64,
    pub level_number: i64,
    pub fast_track_experience_required: Option<i64>,
    pub completion_window_days: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContentItem {
    pub id: i64,
    pub course_level_id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub sequence_order: i64,
    pub min_watch_percentage: i64,
    pub passing_score: Option<i64>,
    pub retry_threshold: Option<i64>,
    pub max_attempts_allowed: Option<i64>,
    pub is_final_exam: bool,
}

impl ContentItem {
    pub fn pass_mark(&self) -> i64 {
        self.passing_score.unwrap_or(DEFAULT_PASSING_SCORE)
    }

    pub fn attempt_cap(&self) -> i64 {
        self.max_attempts_allowed.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

/// One worker's time-boxed attempt at one course level.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LevelEnrollment {
    pub id: i64,
    pub worker_id: i64,
    pub course_level_id: i64,
    pub order_id: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub deadline_date: DateTime<Utc>,
    pub status: EnrollmentStatus,
    pub completion_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContentProgress {
    pub id: i64,
    pub enrollment_id: i64,
    pub content_item_id: i64,
    pub status: ProgressStatus,
    pub watch_percentage: i64,
    pub quiz_score: Option<i64>,
    pub attempts_count: i64,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Certificate {
    pub id: i64,
    pub enrollment_id: i64,
    pub certificate_code: String,
    pub issue_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub company_id: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub worker_id: i64,
    pub course_level_id: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QuizQuestion {
    pub id: i64,
    pub content_item_id: i64,
    pub prompt: String,
    pub points: i64,
    #[sqlx(skip)]
    pub options: Vec<QuizOption>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QuizOption {
    pub id: i64,
    pub question_id: i64,
    pub label: String,
    pub is_correct: bool,
}
