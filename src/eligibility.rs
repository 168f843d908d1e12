use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::db;
use crate::error::AppError;
use crate::models::EnrollmentStatus;
use crate::progress;

/// Inter-level waiting period between completing one level and purchasing
/// the next.
pub const WAITING_PERIOD_MONTHS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    Rejected(EligibilityRejection),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum EligibilityRejection {
    LevelNotFound,
    AlreadyActive,
    AlreadyCompleted,
    PreviousLevelIncomplete { required_level: i64 },
    WaitingPeriod { eligible_on: DateTime<Utc> },
}

impl EligibilityRejection {
    pub fn code(&self) -> &'static str {
        match self {
            EligibilityRejection::LevelNotFound => "level_not_found",
            EligibilityRejection::AlreadyActive => "already_active",
            EligibilityRejection::AlreadyCompleted => "already_completed",
            EligibilityRejection::PreviousLevelIncomplete { .. } => "previous_level_incomplete",
            EligibilityRejection::WaitingPeriod { .. } => "waiting_period",
        }
    }

    pub fn message(&self) -> String {
        match self {
            EligibilityRejection::LevelNotFound => "Course level not found".to_string(),
            EligibilityRejection::AlreadyActive => {
                "Worker is already actively enrolled in this level".to_string()
            }
            EligibilityRejection::AlreadyCompleted => {
                "Worker has already completed this level".to_string()
            }
            EligibilityRejection::PreviousLevelIncomplete { required_level } => {
                format!("Worker must complete level {} first", required_level)
            }
            EligibilityRejection::WaitingPeriod { eligible_on } => format!(
                "Worker must wait 2 years after completing the previous level, eligible on {}",
                eligible_on.to_rfc3339()
            ),
        }
    }
}

/// Decides whether a worker may be enrolled in a course level. Rules run in
/// order; the first failing rule wins. Callers that go on to create an
/// enrollment must run this on the same transaction connection, otherwise two
/// concurrent orders can both pass for the same worker and level.
#[instrument(skip(conn))]
pub async fn check_eligibility(
    conn: &mut SqliteConnection,
    worker_id: i64,
    course_level_id: i64,
) -> Result<Eligibility, AppError> {
    info!("Checking enrollment eligibility");

    let level = match db::get_course_level(&mut *conn, course_level_id).await? {
        Some(level) => level,
        None => return Ok(Eligibility::Rejected(EligibilityRejection::LevelNotFound)),
    };

    if let Some(active) =
        db::find_enrollment_with_status(&mut *conn, worker_id, level.id, EnrollmentStatus::Active)
            .await?
    {
        // An overdue enrollment nobody touched is still stored ACTIVE; the
        // lazy expiry rule runs before the duplicate guard.
        let active = progress::check_expiry(&mut *conn, active).await?;
        if active.status == EnrollmentStatus::Active {
            return Ok(Eligibility::Rejected(EligibilityRejection::AlreadyActive));
        }
    }

    if db::find_enrollment_with_status(&mut *conn, worker_id, level.id, EnrollmentStatus::Completed)
        .await?
        .is_some()
    {
        return Ok(Eligibility::Rejected(EligibilityRejection::AlreadyCompleted));
    }

    // The entry level has no prerequisite.
    if level.level_number == 1 {
        return Ok(Eligibility::Eligible);
    }

    let worker = db::get_worker(&mut *conn, worker_id).await?;

    let previous_number = level.level_number - 1;
    let previous_level = db::get_sibling_level(&mut *conn, level.course_id, previous_number)
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Course {} has no definition for level {}",
                level.course_id, previous_number
            ))
        })?;

    let previous_enrollment = match db::find_enrollment_with_status(
        &mut *conn,
        worker_id,
        previous_level.id,
        EnrollmentStatus::Completed,
    )
    .await?
    {
        Some(enrollment) => enrollment,
        None => {
            return Ok(Eligibility::Rejected(
                EligibilityRejection::PreviousLevelIncomplete {
                    required_level: previous_number,
                },
            ));
        }
    };

    let completed_on = previous_enrollment.completion_date.ok_or_else(|| {
        AppError::Internal(format!(
            "Enrollment {} is completed but has no completion date",
            previous_enrollment.id
        ))
    })?;

    let waiting_period_ends = completed_on
        .checked_add_months(Months::new(WAITING_PERIOD_MONTHS))
        .ok_or_else(|| AppError::Internal("Waiting period date out of range".to_string()))?;

    // Experience-based exception, defined for level 2 only: enough years on
    // the job waive the waiting period entirely.
    if level.level_number == 2 {
        if let Some(required_years) = level.fast_track_experience_required {
            if worker.years_experience >= required_years {
                info!(
                    years_experience = worker.years_experience,
                    required_years, "Fast-track exception applies, waiving waiting period"
                );
                return Ok(Eligibility::Eligible);
            }
        }
    }

    if Utc::now() < waiting_period_ends {
        return Ok(Eligibility::Rejected(EligibilityRejection::WaitingPeriod {
            eligible_on: waiting_period_ends,
        }));
    }

    Ok(Eligibility::Eligible)
}
