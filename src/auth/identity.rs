use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde_json::{Value, json};

use super::{Permission, Role};

/// Caller identity as supplied by the upstream auth subsystem. The gateway
/// terminates authentication and forwards the verified identity in headers;
/// this service trusts them as given.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub worker_id: i64,
    pub company_id: Option<i64>,
    pub role: Role,
}

impl WorkerIdentity {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                worker_id = self.worker_id,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WorkerIdentity {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = request.headers();

        let worker_id = headers
            .get_one("X-Worker-Id")
            .and_then(|v| v.parse::<i64>().ok());

        let role = headers
            .get_one("X-Role")
            .and_then(|v| Role::from_str(v).ok());

        let company_id = headers
            .get_one("X-Company-Id")
            .and_then(|v| v.parse::<i64>().ok());

        match (worker_id, role) {
            (Some(worker_id), Some(role)) => {
                tracing::debug!(worker_id, role = %role.as_str(), "Caller identity resolved");
                Outcome::Success(WorkerIdentity {
                    worker_id,
                    company_id,
                    role,
                })
            }
            _ => {
                tracing::warn!("Request missing or carrying malformed identity headers");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Unauthorized",
        "message": "Caller identity headers are required"
    });

    Custom(Status::Unauthorized, Json(error_json))
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    let error_json = json!({
        "error": "Forbidden",
        "message": "You don't have permission to perform this action"
    });

    Custom(Status::Forbidden, Json(error_json))
}
