use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::{Permission, WorkerIdentity};
use crate::db;
use crate::eligibility::{self, Eligibility};
use crate::error::AppError;
use crate::models::{
    Certificate, ContentType, EnrollmentStatus, LevelEnrollment, ProgressStatus,
};
use crate::orders::{self, ActivationOutcome, ItemRejection};
use crate::progress::{self, SubmitOutcome, SubmitPayload, SubmitResult};
use crate::quiz::QuizAnswer;
use crate::audit;
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationResponse};

#[derive(Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub eligible: bool,
    pub code: Option<String>,
    pub reason: Option<String>,
}

#[get("/workers/<worker_id>/eligibility/<course_level_id>")]
pub async fn api_check_eligibility(
    worker_id: i64,
    course_level_id: i64,
    identity: WorkerIdentity,
    db: &State<SqlitePool>,
) -> Result<Json<EligibilityResponse>, Status> {
    if identity.worker_id != worker_id
        && !identity.has_permission(Permission::CheckWorkerEligibility)
    {
        return Err(Status::Forbidden);
    }

    let mut conn = db.acquire().await.map_err(AppError::from)?;

    let outcome = eligibility::check_eligibility(&mut conn, worker_id, course_level_id).await?;

    let response = match outcome {
        Eligibility::Eligible => EligibilityResponse {
            eligible: true,
            code: None,
            reason: None,
        },
        Eligibility::Rejected(rejection) => EligibilityResponse {
            eligible: false,
            code: Some(rejection.code().to_string()),
            reason: Some(rejection.message()),
        },
    };

    Ok(Json(response))
}

#[derive(Serialize, Deserialize)]
pub struct ItemRejectionData {
    pub order_item_id: i64,
    pub worker_id: i64,
    pub course_level_id: i64,
    pub code: String,
    pub reason: String,
}

impl From<ItemRejection> for ItemRejectionData {
    fn from(item: ItemRejection) -> Self {
        Self {
            order_item_id: item.order_item_id,
            worker_id: item.worker_id,
            course_level_id: item.course_level_id,
            code: item.rejection.code().to_string(),
            reason: item.rejection.message(),
        }
    }
}

#[derive(Serialize)]
pub struct ActivationResponse {
    pub order_id: i64,
    pub activated: bool,
    pub already_activated: bool,
    pub enrollments: Vec<LevelEnrollment>,
    pub rejections: Vec<ItemRejectionData>,
}

#[post("/orders/<order_id>/activate")]
pub async fn api_activate_order(
    order_id: i64,
    identity: WorkerIdentity,
    db: &State<SqlitePool>,
) -> Result<(Status, Json<ActivationResponse>), Status> {
    identity.require_permission(Permission::ActivateOrders)?;

    let mut tx = db.begin().await.map_err(AppError::from)?;
    let outcome = orders::activate_order(&mut tx, order_id).await?;

    match outcome {
        ActivationOutcome::Activated(enrollments) => {
            tx.commit().await.map_err(AppError::from)?;

            audit::record(
                db,
                Some(identity.worker_id),
                "order_paid",
                "order",
                order_id,
                json!({ "enrollments": enrollments.len() }),
            )
            .await;
            for enrollment in &enrollments {
                audit::record(
                    db,
                    Some(identity.worker_id),
                    "enrollment_created",
                    "level_enrollment",
                    enrollment.id,
                    json!({
                        "worker_id": enrollment.worker_id,
                        "course_level_id": enrollment.course_level_id,
                        "deadline_date": enrollment.deadline_date,
                    }),
                )
                .await;
            }

            Ok((
                Status::Ok,
                Json(ActivationResponse {
                    order_id,
                    activated: true,
                    already_activated: false,
                    enrollments,
                    rejections: vec![],
                }),
            ))
        }
        ActivationOutcome::AlreadyActivated(enrollments) => {
            tx.commit().await.map_err(AppError::from)?;

            Ok((
                Status::Ok,
                Json(ActivationResponse {
                    order_id,
                    activated: false,
                    already_activated: true,
                    enrollments,
                    rejections: vec![],
                }),
            ))
        }
        ActivationOutcome::Rejected(rejections) => {
            tx.rollback().await.map_err(AppError::from)?;

            Ok((
                Status::Conflict,
                Json(ActivationResponse {
                    order_id,
                    activated: false,
                    already_activated: false,
                    enrollments: vec![],
                    rejections: rejections.into_iter().map(ItemRejectionData::from).collect(),
                }),
            ))
        }
    }
}

#[derive(Serialize)]
pub struct ContentProgressData {
    pub content_item_id: i64,
    pub title: String,
    pub content_type: ContentType,
    pub sequence_order: i64,
    pub is_final_exam: bool,
    pub status: ProgressStatus,
    pub watch_percentage: i64,
    pub quiz_score: Option<i64>,
    pub attempts_count: i64,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub enrollment: LevelEnrollment,
    pub items: Vec<ContentProgressData>,
}

#[get("/enrollments/<enrollment_id>/progress")]
pub async fn api_get_progress(
    enrollment_id: i64,
    identity: WorkerIdentity,
    db: &State<SqlitePool>,
) -> Result<Json<ProgressResponse>, Status> {
    let enrollment = db::get_enrollment(db.inner(), enrollment_id).await?;

    if identity.worker_id != enrollment.worker_id {
        if !identity.has_permission(Permission::ViewWorkerProgress) {
            return Err(Status::Forbidden);
        }
    } else if !identity.has_permission(Permission::ViewOwnProgress) {
        return Err(Status::Forbidden);
    }

    let prior_status = enrollment.status;

    let mut tx = db.begin().await.map_err(AppError::from)?;
    let (enrollment, rows) = progress::get_or_init_progress(&mut tx, enrollment_id).await?;
    tx.commit().await.map_err(AppError::from)?;

    if prior_status == EnrollmentStatus::Active && enrollment.status == EnrollmentStatus::Expired {
        audit::record(
            db,
            Some(identity.worker_id),
            "enrollment_expired",
            "level_enrollment",
            enrollment.id,
            json!({ "deadline_date": enrollment.deadline_date }),
        )
        .await;
    }

    let items = db::get_content_items(db.inner(), enrollment.course_level_id).await?;
    let merged = rows
        .into_iter()
        .filter_map(|row| {
            items
                .iter()
                .find(|item| item.id == row.content_item_id)
                .map(|item| ContentProgressData {
                    content_item_id: item.id,
                    title: item.title.clone(),
                    content_type: item.content_type,
                    sequence_order: item.sequence_order,
                    is_final_exam: item.is_final_exam,
                    status: row.status,
                    watch_percentage: row.watch_percentage,
                    quiz_score: row.quiz_score,
                    attempts_count: row.attempts_count,
                })
        })
        .collect();

    Ok(Json(ProgressResponse {
        enrollment,
        items: merged,
    }))
}

#[derive(Deserialize)]
pub struct QuizAnswerRequest {
    pub question_id: i64,
    pub selected_option_id: i64,
}

#[derive(Deserialize, Validate)]
pub struct SubmitProgressRequest {
    #[validate(range(min = 0, max = 100))]
    pub watch_percentage: Option<i64>,
    #[validate(range(min = 0, max = 100))]
    pub score: Option<i64>,
    pub answers: Option<Vec<QuizAnswerRequest>>,
}

#[derive(Serialize, Deserialize)]
pub struct SubmitProgressResponse {
    pub outcome: String,
    pub message: String,
    pub enrollment_status: EnrollmentStatus,
    pub content_status: Option<ProgressStatus>,
    pub score: Option<i64>,
    pub watch_percentage: Option<i64>,
    pub attempts_count: Option<i64>,
    pub unlocked_content_id: Option<i64>,
    pub rewatch_content_id: Option<i64>,
    pub certificate_code: Option<String>,
}

fn submit_response(result: SubmitResult) -> SubmitProgressResponse {
    let content_status = result.progress.as_ref().map(|p| p.status);
    let watch_percentage = result.progress.as_ref().map(|p| p.watch_percentage);
    let attempts_count = result.progress.as_ref().map(|p| p.attempts_count);

    let (outcome, message, score, unlocked, rewatch, certificate_code) = match result.outcome {
        SubmitOutcome::VideoInProgress { watch_percentage } => (
            "video_in_progress",
            format!("Watch progress recorded at {}%", watch_percentage),
            None,
            None,
            None,
            None,
        ),
        SubmitOutcome::ContentCompleted {
            score,
            unlocked_content_id,
        } => (
            "content_completed",
            "Content completed".to_string(),
            score,
            unlocked_content_id,
            None,
            None,
        ),
        SubmitOutcome::LevelCompleted { score, certificate } => (
            "level_completed",
            "Level completed, certificate issued".to_string(),
            score,
            None,
            None,
            Some(certificate.certificate_code),
        ),
        SubmitOutcome::QuizFailed {
            score,
            attempts_count,
        } => (
            "quiz_failed",
            format!("Quiz failed on attempt {}, retry available", attempts_count),
            Some(score),
            None,
            None,
            None,
        ),
        SubmitOutcome::HardFailed {
            score,
            rewatch_content_id,
        } => (
            "hard_failed",
            "Score below the retry threshold, earlier video content must be re-watched"
                .to_string(),
            Some(score),
            None,
            rewatch_content_id,
            None,
        ),
        SubmitOutcome::EnrollmentFailed { score } => (
            "enrollment_failed",
            "Maximum attempts exceeded, the course level has been failed".to_string(),
            Some(score),
            None,
            None,
            None,
        ),
        SubmitOutcome::EnrollmentExpired => (
            "enrollment_expired",
            "Enrollment deadline has passed".to_string(),
            None,
            None,
            None,
            None,
        ),
    };

    SubmitProgressResponse {
        outcome: outcome.to_string(),
        message,
        enrollment_status: result.enrollment_status,
        content_status,
        score,
        watch_percentage,
        attempts_count,
        unlocked_content_id: unlocked,
        rewatch_content_id: rewatch,
        certificate_code,
    }
}

#[post(
    "/enrollments/<enrollment_id>/content/<content_item_id>/progress",
    data = "<request>"
)]
pub async fn api_submit_progress(
    enrollment_id: i64,
    content_item_id: i64,
    request: Json<SubmitProgressRequest>,
    identity: WorkerIdentity,
    db: &State<SqlitePool>,
) -> Result<Json<SubmitProgressResponse>, Custom<Json<ValidationResponse>>> {
    let validated = request.validate_custom()?;

    identity
        .require_permission(Permission::SubmitOwnProgress)
        .map_err(|status| {
            Custom(
                status,
                Json(ValidationResponse::with_error(
                    "permission",
                    "You don't have permission to submit progress",
                )),
            )
        })?;

    let enrollment = db::get_enrollment(db.inner(), enrollment_id)
        .await
        .validate_custom()?;

    if identity.worker_id != enrollment.worker_id {
        return Err(Custom(
            Status::Forbidden,
            Json(ValidationResponse::with_error(
                "permission",
                "Progress can only be submitted for your own enrollment",
            )),
        ));
    }

    let payload = SubmitPayload {
        watch_percentage: validated.watch_percentage,
        score: validated.score,
        answers: validated.answers.map(|answers| {
            answers
                .into_iter()
                .map(|a| QuizAnswer {
                    question_id: a.question_id,
                    selected_option_id: a.selected_option_id,
                })
                .collect()
        }),
    };

    let mut tx = db
        .begin()
        .await
        .map_err(AppError::from)
        .validate_custom()?;
    let result = progress::submit_progress(&mut tx, enrollment_id, content_item_id, payload)
        .await
        .validate_custom()?;
    tx.commit().await.map_err(AppError::from).validate_custom()?;

    match &result.outcome {
        SubmitOutcome::LevelCompleted { certificate, .. } => {
            audit::record(
                db,
                Some(identity.worker_id),
                "enrollment_completed",
                "level_enrollment",
                enrollment_id,
                json!({ "certificate_code": certificate.certificate_code }),
            )
            .await;
        }
        SubmitOutcome::EnrollmentFailed { score } => {
            audit::record(
                db,
                Some(identity.worker_id),
                "enrollment_failed",
                "level_enrollment",
                enrollment_id,
                json!({ "score": score }),
            )
            .await;
        }
        SubmitOutcome::EnrollmentExpired => {
            audit::record(
                db,
                Some(identity.worker_id),
                "enrollment_expired",
                "level_enrollment",
                enrollment_id,
                json!({ "deadline_date": enrollment.deadline_date }),
            )
            .await;
        }
        _ => {}
    }

    Ok(Json(submit_response(result)))
}

#[get("/enrollments/<enrollment_id>/certificate")]
pub async fn api_get_certificate(
    enrollment_id: i64,
    identity: WorkerIdentity,
    db: &State<SqlitePool>,
) -> Result<Json<Certificate>, Status> {
    let mut conn = db.acquire().await.map_err(AppError::from)?;
    let enrollment = db::get_enrollment(&mut *conn, enrollment_id).await?;

    if identity.worker_id != enrollment.worker_id {
        if !identity.has_permission(Permission::ViewWorkerProgress) {
            return Err(Status::Forbidden);
        }
    } else if !identity.has_permission(Permission::ViewOwnCertificates) {
        return Err(Status::Forbidden);
    }

    let enrollment = progress::check_expiry(&mut conn, enrollment).await?;

    match db::get_certificate(&mut *conn, enrollment.id).await? {
        Some(certificate) => Ok(Json(certificate)),
        None => Err(Status::NotFound),
    }
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
