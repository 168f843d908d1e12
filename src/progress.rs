use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::certificate;
use crate::db;
use crate::error::AppError;
use crate::models::{
    Certificate, ContentItem, ContentProgress, ContentType, EnrollmentStatus, LevelEnrollment,
    ProgressStatus,
};
use crate::quiz::{self, QuizAnswer};

#[derive(Debug, Clone, Default)]
pub struct SubmitPayload {
    pub watch_percentage: Option<i64>,
    pub answers: Option<Vec<QuizAnswer>>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Video watched but still under the completion threshold.
    VideoInProgress { watch_percentage: i64 },
    /// Content passed; the next item in sequence was unlocked, if one exists.
    ContentCompleted {
        score: Option<i64>,
        unlocked_content_id: Option<i64>,
    },
    /// The last content item passed: the level is complete.
    LevelCompleted {
        score: Option<i64>,
        certificate: Certificate,
    },
    /// Ordinary quiz failure; the worker may retry.
    QuizFailed { score: i64, attempts_count: i64 },
    /// Score fell below the retry threshold: the quiz re-locked and the
    /// nearest preceding video must be watched again.
    HardFailed {
        score: i64,
        rewatch_content_id: Option<i64>,
    },
    /// Final-exam attempts exhausted; the whole enrollment failed.
    EnrollmentFailed { score: i64 },
    /// Deadline passed; no progress mutation is allowed.
    EnrollmentExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub outcome: SubmitOutcome,
    pub enrollment_status: EnrollmentStatus,
    pub progress: Option<ContentProgress>,
}

/// Lazy expiry rule, applied before any read or write that touches an
/// enrollment: an ACTIVE enrollment past its deadline flips to EXPIRED.
#[instrument(skip(conn, enrollment), fields(enrollment_id = enrollment.id))]
pub async fn check_expiry(
    conn: &mut SqliteConnection,
    enrollment: LevelEnrollment,
) -> Result<LevelEnrollment, AppError> {
    if enrollment.status == EnrollmentStatus::Active && Utc::now() > enrollment.deadline_date {
        info!(
            deadline = %enrollment.deadline_date,
            "Enrollment deadline passed, marking expired"
        );
        db::set_enrollment_status(&mut *conn, enrollment.id, EnrollmentStatus::Expired, None)
            .await?;
        return Ok(LevelEnrollment {
            status: EnrollmentStatus::Expired,
            ..enrollment
        });
    }
    Ok(enrollment)
}

/// Materializes the progress rows mirroring the level's content items: the
/// first item in sequence starts unlocked, everything after it locked.
/// Content added to the level later is not back-filled.
async fn materialize_progress(
    conn: &mut SqliteConnection,
    enrollment: &LevelEnrollment,
) -> Result<(), AppError> {
    let items = db::get_content_items(&mut *conn, enrollment.course_level_id).await?;
    for (index, item) in items.iter().enumerate() {
        if db::find_progress(&mut *conn, enrollment.id, item.id)
            .await?
            .is_none()
        {
            let initial = if index == 0 {
                ProgressStatus::Unlocked
            } else {
                ProgressStatus::Locked
            };
            db::create_progress(&mut *conn, enrollment.id, item.id, initial).await?;
        }
    }
    Ok(())
}

/// Returns the enrollment's progress rows, creating them on first access.
/// Expired or otherwise terminal enrollments get their current rows back
/// read-only.
#[instrument(skip(conn))]
pub async fn get_or_init_progress(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
) -> Result<(LevelEnrollment, Vec<ContentProgress>), AppError> {
    let enrollment = db::get_enrollment(&mut *conn, enrollment_id).await?;
    let enrollment = check_expiry(&mut *conn, enrollment).await?;

    if enrollment.status == EnrollmentStatus::Active {
        materialize_progress(&mut *conn, &enrollment).await?;
    }

    let rows = db::get_progress_for_enrollment(&mut *conn, enrollment.id).await?;
    Ok((enrollment, rows))
}

/// Applies one worker activity (video watch or quiz submission) to the
/// enrollment's progress state machine, running the unlock cascade when the
/// content passes. The caller owns the surrounding transaction; everything
/// here is all-or-nothing with it.
#[instrument(skip(conn, payload))]
pub async fn submit_progress(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    content_item_id: i64,
    payload: SubmitPayload,
) -> Result<SubmitResult, AppError> {
    let enrollment = db::get_enrollment(&mut *conn, enrollment_id).await?;
    let enrollment = check_expiry(&mut *conn, enrollment).await?;

    if enrollment.status == EnrollmentStatus::Expired {
        return Ok(SubmitResult {
            outcome: SubmitOutcome::EnrollmentExpired,
            enrollment_status: EnrollmentStatus::Expired,
            progress: None,
        });
    }

    if enrollment.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "Enrollment {} is {} and no longer accepts progress",
            enrollment.id, enrollment.status
        )));
    }

    let content = db::get_content_item(&mut *conn, content_item_id)
        .await?
        .filter(|c| c.course_level_id == enrollment.course_level_id)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Content item {} not found in enrollment {}'s level",
                content_item_id, enrollment_id
            ))
        })?;

    materialize_progress(&mut *conn, &enrollment).await?;

    let progress = db::find_progress(&mut *conn, enrollment.id, content.id)
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Progress row missing for enrollment {} content {}",
                enrollment.id, content.id
            ))
        })?;

    if progress.status == ProgressStatus::Locked {
        return Err(AppError::Validation(format!(
            "Content item {} is locked for enrollment {}",
            content.id, enrollment.id
        )));
    }

    match content.content_type {
        ContentType::Video => submit_video(conn, &enrollment, &content, &progress, &payload).await,
        ContentType::Questionnaire => {
            submit_quiz(conn, &enrollment, &content, &progress, &payload).await
        }
    }
}

async fn submit_video(
    conn: &mut SqliteConnection,
    enrollment: &LevelEnrollment,
    content: &ContentItem,
    progress: &ContentProgress,
    payload: &SubmitPayload,
) -> Result<SubmitResult, AppError> {
    let submitted = payload.watch_percentage.ok_or_else(|| {
        AppError::Validation("watch_percentage is required for video content".to_string())
    })?;

    // Watch percentage never decreases.
    let watch_percentage = progress.watch_percentage.max(submitted);
    let now = Utc::now();

    if watch_percentage >= content.min_watch_percentage {
        db::update_video_progress(
            &mut *conn,
            progress.id,
            watch_percentage,
            ProgressStatus::Completed,
            now,
        )
        .await?;
        advance_after_pass(conn, enrollment, content, None).await
    } else {
        db::update_video_progress(
            &mut *conn,
            progress.id,
            watch_percentage,
            ProgressStatus::InProgress,
            now,
        )
        .await?;
        let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
        Ok(SubmitResult {
            outcome: SubmitOutcome::VideoInProgress { watch_percentage },
            enrollment_status: enrollment.status,
            progress: refreshed,
        })
    }
}

async fn submit_quiz(
    conn: &mut SqliteConnection,
    enrollment: &LevelEnrollment,
    content: &ContentItem,
    progress: &ContentProgress,
    payload: &SubmitPayload,
) -> Result<SubmitResult, AppError> {
    let score = match (&payload.answers, payload.score) {
        (Some(answers), _) => {
            let questions = db::get_quiz_questions(&mut *conn, content.id).await?;
            quiz::score_quiz(&questions, answers)
        }
        (None, Some(score)) => score,
        (None, None) => {
            return Err(AppError::Validation(
                "Either answers or a score is required for questionnaire content".to_string(),
            ));
        }
    };

    let now = Utc::now();
    let attempts_count = progress.attempts_count + 1;

    if score >= content.pass_mark() {
        db::record_quiz_attempt(&mut *conn, progress.id, score, ProgressStatus::Completed, now)
            .await?;
        return advance_after_pass(conn, enrollment, content, Some(score)).await;
    }

    // Hard fail: a score this low sends the worker back to the preceding
    // video before the quiz can be attempted again.
    if let Some(threshold) = content.retry_threshold {
        if score < threshold {
            db::record_quiz_attempt(&mut *conn, progress.id, score, ProgressStatus::Locked, now)
                .await?;

            let rewatch = db::preceding_video_item(
                &mut *conn,
                enrollment.course_level_id,
                content.sequence_order,
            )
            .await?;
            if let Some(video) = &rewatch {
                match db::find_progress(&mut *conn, enrollment.id, video.id).await? {
                    Some(video_progress) => {
                        db::reset_video_progress(&mut *conn, video_progress.id, now).await?
                    }
                    None => {
                        db::create_progress(
                            &mut *conn,
                            enrollment.id,
                            video.id,
                            ProgressStatus::Unlocked,
                        )
                        .await?;
                    }
                }
            }

            info!(
                score,
                threshold,
                rewatch_content_id = ?rewatch.as_ref().map(|v| v.id),
                "Hard fail, rolling back to earlier video content"
            );
            let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
            return Ok(SubmitResult {
                outcome: SubmitOutcome::HardFailed {
                    score,
                    rewatch_content_id: rewatch.map(|v| v.id),
                },
                enrollment_status: enrollment.status,
                progress: refreshed,
            });
        }
    }

    if content.is_final_exam && attempts_count >= content.attempt_cap() {
        db::record_quiz_attempt(&mut *conn, progress.id, score, ProgressStatus::Failed, now)
            .await?;
        db::set_enrollment_status(&mut *conn, enrollment.id, EnrollmentStatus::Failed, None)
            .await?;

        info!(
            score,
            attempts_count, "Final exam attempts exhausted, failing enrollment"
        );
        let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
        return Ok(SubmitResult {
            outcome: SubmitOutcome::EnrollmentFailed { score },
            enrollment_status: EnrollmentStatus::Failed,
            progress: refreshed,
        });
    }

    db::record_quiz_attempt(&mut *conn, progress.id, score, ProgressStatus::Failed, now).await?;
    let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
    Ok(SubmitResult {
        outcome: SubmitOutcome::QuizFailed {
            score,
            attempts_count,
        },
        enrollment_status: enrollment.status,
        progress: refreshed,
    })
}

/// Unlock cascade. Exactly the next item in sequence unlocks; when there is
/// no next item the level is finished and the certificate is issued in the
/// same transaction.
async fn advance_after_pass(
    conn: &mut SqliteConnection,
    enrollment: &LevelEnrollment,
    content: &ContentItem,
    score: Option<i64>,
) -> Result<SubmitResult, AppError> {
    let now = Utc::now();

    match db::next_content_item(&mut *conn, enrollment.course_level_id, content.sequence_order)
        .await?
    {
        Some(next) => {
            match db::find_progress(&mut *conn, enrollment.id, next.id).await? {
                Some(next_progress) if next_progress.status == ProgressStatus::Locked => {
                    db::set_progress_status(&mut *conn, next_progress.id, ProgressStatus::Unlocked, now)
                        .await?;
                }
                Some(_) => {}
                None => {
                    db::create_progress(
                        &mut *conn,
                        enrollment.id,
                        next.id,
                        ProgressStatus::Unlocked,
                    )
                    .await?;
                }
            }
            let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
            Ok(SubmitResult {
                outcome: SubmitOutcome::ContentCompleted {
                    score,
                    unlocked_content_id: Some(next.id),
                },
                enrollment_status: enrollment.status,
                progress: refreshed,
            })
        }
        None => {
            db::set_enrollment_status(
                &mut *conn,
                enrollment.id,
                EnrollmentStatus::Completed,
                Some(now),
            )
            .await?;
            let certificate = certificate::issue_certificate(&mut *conn, enrollment.id).await?;

            info!(
                enrollment_id = enrollment.id,
                certificate_code = %certificate.certificate_code,
                "Level completed, certificate issued"
            );
            let refreshed = db::find_progress(&mut *conn, enrollment.id, content.id).await?;
            Ok(SubmitResult {
                outcome: SubmitOutcome::LevelCompleted { score, certificate },
                enrollment_status: EnrollmentStatus::Completed,
                progress: refreshed,
            })
        }
    }
}
