use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    Certificate, ContentItem, ContentProgress, CourseLevel, EnrollmentStatus, LevelEnrollment,
    Order, OrderItem, OrderStatus, ProgressStatus, QuizOption, QuizQuestion, Worker,
};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[instrument(skip(ex))]
pub async fn get_worker(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<Worker, AppError> {
    let row = sqlx::query_as::<_, Worker>(
        "SELECT id, company_id, full_name, years_experience, created_at
         FROM workers WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;

    match row {
        Some(worker) => Ok(worker),
        _ => Err(AppError::NotFound(format!(
            "Worker with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(ex))]
pub async fn get_course_level(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<Option<CourseLevel>, AppError> {
    let row = sqlx::query_as::<_, CourseLevel>(
        "SELECT id, course_id, level_number, fast_track_experience_required,
                completion_window_days
         FROM course_levels WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn get_sibling_level(
    ex: impl Executor<'_, Database = Sqlite>,
    course_id: i64,
    level_number: i64,
) -> Result<Option<CourseLevel>, AppError> {
    let row = sqlx::query_as::<_, CourseLevel>(
        "SELECT id, course_id, level_number, fast_track_experience_required,
                completion_window_days
         FROM course_levels WHERE course_id = ? AND level_number = ?",
    )
    .bind(course_id)
    .bind(level_number)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn find_enrollment_with_status(
    ex: impl Executor<'_, Database = Sqlite>,
    worker_id: i64,
    course_level_id: i64,
    status: EnrollmentStatus,
) -> Result<Option<LevelEnrollment>, AppError> {
    let row = sqlx::query_as::<_, LevelEnrollment>(
        "SELECT id, worker_id, course_level_id, order_id, start_date, deadline_date,
                status, completion_date
         FROM level_enrollments
         WHERE worker_id = ? AND course_level_id = ? AND status = ?
         ORDER BY start_date DESC LIMIT 1",
    )
    .bind(worker_id)
    .bind(course_level_id)
    .bind(status)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn get_enrollment(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<LevelEnrollment, AppError> {
    let row = sqlx::query_as::<_, LevelEnrollment>(
        "SELECT id, worker_id, course_level_id, order_id, start_date, deadline_date,
                status, completion_date
         FROM level_enrollments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;

    match row {
        Some(enrollment) => Ok(enrollment),
        _ => Err(AppError::NotFound(format!(
            "Enrollment with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(conn))]
pub async fn create_enrollment(
    conn: &mut SqliteConnection,
    worker_id: i64,
    course_level_id: i64,
    order_id: Option<i64>,
    start_date: DateTime<Utc>,
    deadline_date: DateTime<Utc>,
) -> Result<LevelEnrollment, AppError> {
    info!("Creating level enrollment");
    let res = sqlx::query(
        "INSERT INTO level_enrollments
         (worker_id, course_level_id, order_id, start_date, deadline_date, status)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(worker_id)
    .bind(course_level_id)
    .bind(order_id)
    .bind(start_date)
    .bind(deadline_date)
    .bind(EnrollmentStatus::Active)
    .execute(&mut *conn)
    .await?;

    get_enrollment(&mut *conn, res.last_insert_rowid()).await
}

#[instrument(skip(ex))]
pub async fn set_enrollment_status(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
    status: EnrollmentStatus,
    completion_date: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    info!(status = %status, "Updating enrollment status");
    sqlx::query("UPDATE level_enrollments SET status = ?, completion_date = ? WHERE id = ?")
        .bind(status)
        .bind(completion_date)
        .bind(id)
        .execute(ex)
        .await?;

    Ok(())
}

/// Sweep counterpart of the lazy check-on-access expiry rule.
#[instrument(skip(ex))]
pub async fn expire_overdue_enrollments(
    ex: impl Executor<'_, Database = Sqlite>,
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE level_enrollments SET status = ? WHERE status = ? AND deadline_date < ?",
    )
    .bind(EnrollmentStatus::Expired)
    .bind(EnrollmentStatus::Active)
    .bind(now)
    .execute(ex)
    .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(ex))]
pub async fn get_content_items(
    ex: impl Executor<'_, Database = Sqlite>,
    course_level_id: i64,
) -> Result<Vec<ContentItem>, AppError> {
    let rows = sqlx::query_as::<_, ContentItem>(
        "SELECT id, course_level_id, content_type, title, sequence_order,
                min_watch_percentage, passing_score, retry_threshold,
                max_attempts_allowed, is_final_exam
         FROM content_items
         WHERE course_level_id = ?
         ORDER BY sequence_order",
    )
    .bind(course_level_id)
    .fetch_all(ex)
    .await?;

    Ok(rows)
}

#[instrument(skip(ex))]
pub async fn get_content_item(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<Option<ContentItem>, AppError> {
    let row = sqlx::query_as::<_, ContentItem>(
        "SELECT id, course_level_id, content_type, title, sequence_order,
                min_watch_percentage, passing_score, retry_threshold,
                max_attempts_allowed, is_final_exam
         FROM content_items WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn next_content_item(
    ex: impl Executor<'_, Database = Sqlite>,
    course_level_id: i64,
    after_sequence: i64,
) -> Result<Option<ContentItem>, AppError> {
    let row = sqlx::query_as::<_, ContentItem>(
        "SELECT id, course_level_id, content_type, title, sequence_order,
                min_watch_percentage, passing_score, retry_threshold,
                max_attempts_allowed, is_final_exam
         FROM content_items
         WHERE course_level_id = ? AND sequence_order > ?
         ORDER BY sequence_order LIMIT 1",
    )
    .bind(course_level_id)
    .bind(after_sequence)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn preceding_video_item(
    ex: impl Executor<'_, Database = Sqlite>,
    course_level_id: i64,
    before_sequence: i64,
) -> Result<Option<ContentItem>, AppError> {
    let row = sqlx::query_as::<_, ContentItem>(
        "SELECT id, course_level_id, content_type, title, sequence_order,
                min_watch_percentage, passing_score, retry_threshold,
                max_attempts_allowed, is_final_exam
         FROM content_items
         WHERE course_level_id = ? AND sequence_order < ? AND content_type = 'video'
         ORDER BY sequence_order DESC LIMIT 1",
    )
    .bind(course_level_id)
    .bind(before_sequence)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn get_progress_for_enrollment(
    ex: impl Executor<'_, Database = Sqlite>,
    enrollment_id: i64,
) -> Result<Vec<ContentProgress>, AppError> {
    let rows = sqlx::query_as::<_, ContentProgress>(
        "SELECT p.id, p.enrollment_id, p.content_item_id, p.status, p.watch_percentage,
                p.quiz_score, p.attempts_count, p.last_accessed_at
         FROM content_progress p
         JOIN content_items c ON c.id = p.content_item_id
         WHERE p.enrollment_id = ?
         ORDER BY c.sequence_order",
    )
    .bind(enrollment_id)
    .fetch_all(ex)
    .await?;

    Ok(rows)
}

#[instrument(skip(ex))]
pub async fn find_progress(
    ex: impl Executor<'_, Database = Sqlite>,
    enrollment_id: i64,
    content_item_id: i64,
) -> Result<Option<ContentProgress>, AppError> {
    let row = sqlx::query_as::<_, ContentProgress>(
        "SELECT id, enrollment_id, content_item_id, status, watch_percentage,
                quiz_score, attempts_count, last_accessed_at
         FROM content_progress
         WHERE enrollment_id = ? AND content_item_id = ?",
    )
    .bind(enrollment_id)
    .bind(content_item_id)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

/// Find-or-create on the (enrollment, content item) unique pair. A concurrent
/// insert losing the race resolves to the surviving row.
#[instrument(skip(conn))]
pub async fn create_progress(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    content_item_id: i64,
    status: ProgressStatus,
) -> Result<ContentProgress, AppError> {
    info!("Materializing content progress row");
    let res = sqlx::query(
        "INSERT INTO content_progress
         (enrollment_id, content_item_id, status, watch_percentage, attempts_count, last_accessed_at)
         VALUES (?, ?, ?, 0, 0, ?)",
    )
    .bind(enrollment_id)
    .bind(content_item_id)
    .bind(status)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await;

    match res {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            info!("Progress row already exists, reusing it");
        }
        Err(err) => return Err(err.into()),
    }

    match find_progress(&mut *conn, enrollment_id, content_item_id).await? {
        Some(progress) => Ok(progress),
        _ => Err(AppError::Internal(format!(
            "Progress row for enrollment {} and content {} vanished after insert",
            enrollment_id, content_item_id
        ))),
    }
}

#[instrument(skip(ex))]
pub async fn update_video_progress(
    ex: impl Executor<'_, Database = Sqlite>,
    progress_id: i64,
    watch_percentage: i64,
    status: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    info!(status = %status, "Recording video progress");
    sqlx::query(
        "UPDATE content_progress
         SET watch_percentage = ?, status = ?, last_accessed_at = ?
         WHERE id = ?",
    )
    .bind(watch_percentage)
    .bind(status)
    .bind(now)
    .bind(progress_id)
    .execute(ex)
    .await?;

    Ok(())
}

#[instrument(skip(ex))]
pub async fn record_quiz_attempt(
    ex: impl Executor<'_, Database = Sqlite>,
    progress_id: i64,
    score: i64,
    status: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    info!(score, status = %status, "Recording quiz attempt");
    sqlx::query(
        "UPDATE content_progress
         SET quiz_score = ?, status = ?, attempts_count = attempts_count + 1,
             last_accessed_at = ?
         WHERE id = ?",
    )
    .bind(score)
    .bind(status)
    .bind(now)
    .bind(progress_id)
    .execute(ex)
    .await?;

    Ok(())
}

#[instrument(skip(ex))]
pub async fn set_progress_status(
    ex: impl Executor<'_, Database = Sqlite>,
    progress_id: i64,
    status: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    info!(status = %status, "Updating progress status");
    sqlx::query("UPDATE content_progress SET status = ?, last_accessed_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(progress_id)
        .execute(ex)
        .await?;

    Ok(())
}

/// Hard-fail rollback target: the video must be watched again from scratch.
#[instrument(skip(ex))]
pub async fn reset_video_progress(
    ex: impl Executor<'_, Database = Sqlite>,
    progress_id: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    info!("Resetting video progress for re-watch");
    sqlx::query(
        "UPDATE content_progress
         SET status = ?, watch_percentage = 0, last_accessed_at = ?
         WHERE id = ?",
    )
    .bind(ProgressStatus::Unlocked)
    .bind(now)
    .bind(progress_id)
    .execute(ex)
    .await?;

    Ok(())
}

#[instrument(skip(conn))]
pub async fn get_quiz_questions(
    conn: &mut SqliteConnection,
    content_item_id: i64,
) -> Result<Vec<QuizQuestion>, AppError> {
    let mut questions = sqlx::query_as::<_, QuizQuestion>(
        "SELECT id, content_item_id, prompt, points
         FROM quiz_questions WHERE content_item_id = ? ORDER BY id",
    )
    .bind(content_item_id)
    .fetch_all(&mut *conn)
    .await?;

    let options = sqlx::query_as::<_, QuizOption>(
        "SELECT o.id, o.question_id, o.label, o.is_correct
         FROM quiz_options o
         JOIN quiz_questions q ON q.id = o.question_id
         WHERE q.content_item_id = ?
         ORDER BY o.id",
    )
    .bind(content_item_id)
    .fetch_all(&mut *conn)
    .await?;

    for option in options {
        if let Some(question) = questions.iter_mut().find(|q| q.id == option.question_id) {
            question.options.push(option);
        }
    }

    Ok(questions)
}

/// Idempotent on the unique `enrollment_id` constraint: a duplicate issuance
/// returns the certificate that already exists.
#[instrument(skip(conn))]
pub async fn insert_certificate(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    certificate_code: &str,
    issue_date: DateTime<Utc>,
) -> Result<Certificate, AppError> {
    info!("Issuing certificate");
    let res = sqlx::query(
        "INSERT INTO certificates (enrollment_id, certificate_code, issue_date)
         VALUES (?, ?, ?)",
    )
    .bind(enrollment_id)
    .bind(certificate_code)
    .bind(issue_date)
    .execute(&mut *conn)
    .await;

    match res {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            info!(enrollment_id, "Certificate already issued for enrollment");
        }
        Err(err) => return Err(err.into()),
    }

    match get_certificate(&mut *conn, enrollment_id).await? {
        Some(certificate) => Ok(certificate),
        _ => Err(AppError::Internal(format!(
            "Certificate for enrollment {} vanished after insert",
            enrollment_id
        ))),
    }
}

#[instrument(skip(ex))]
pub async fn get_certificate(
    ex: impl Executor<'_, Database = Sqlite>,
    enrollment_id: i64,
) -> Result<Option<Certificate>, AppError> {
    let row = sqlx::query_as::<_, Certificate>(
        "SELECT id, enrollment_id, certificate_code, issue_date
         FROM certificates WHERE enrollment_id = ?",
    )
    .bind(enrollment_id)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn get_order(
    ex: impl Executor<'_, Database = Sqlite>,
    id: i64,
) -> Result<Option<Order>, AppError> {
    let row = sqlx::query_as::<_, Order>(
        "SELECT id, company_id, status, created_at, paid_at FROM orders WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;

    Ok(row)
}

#[instrument(skip(ex))]
pub async fn get_order_items(
    ex: impl Executor<'_, Database = Sqlite>,
    order_id: i64,
) -> Result<Vec<OrderItem>, AppError> {
    let rows = sqlx::query_as::<_, OrderItem>(
        "SELECT id, order_id, worker_id, course_level_id
         FROM order_items WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(ex)
    .await?;

    Ok(rows)
}

#[instrument(skip(ex))]
pub async fn mark_order_paid(
    ex: impl Executor<'_, Database = Sqlite>,
    order_id: i64,
    paid_at: DateTime<Utc>,
) -> Result<(), AppError> {
    info!("Marking order paid");
    sqlx::query("UPDATE orders SET status = ?, paid_at = ? WHERE id = ?")
        .bind(OrderStatus::Paid)
        .bind(paid_at)
        .bind(order_id)
        .execute(ex)
        .await?;

    Ok(())
}

#[instrument(skip(ex))]
pub async fn enrollments_for_order(
    ex: impl Executor<'_, Database = Sqlite>,
    order_id: i64,
) -> Result<Vec<LevelEnrollment>, AppError> {
    let rows = sqlx::query_as::<_, LevelEnrollment>(
        "SELECT id, worker_id, course_level_id, order_id, start_date, deadline_date,
                status, completion_date
         FROM level_enrollments WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(ex)
    .await?;

    Ok(rows)
}
