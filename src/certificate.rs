use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db;
use crate::error::AppError;
use crate::models::Certificate;

const CODE_PREFIX: &str = "CERT-";
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RANDOM_SUFFIX_LEN: usize = 4;

/// Time-based plus random short identifier. Uniqueness by construction only;
/// the unique constraint on `certificates.certificate_code` is the actual
/// guarantee.
pub fn generate_certificate_code(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let mut code = format!("{}{}", CODE_PREFIX, to_base36(now.timestamp_millis()));
    for _ in 0..RANDOM_SUFFIX_LEN {
        code.push(BASE36[rng.random_range(0..BASE36.len())] as char);
    }
    code
}

fn to_base36(mut value: i64) -> String {
    if value <= 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Mints the certificate for a completed enrollment. Safe to invoke twice:
/// a second call returns the certificate issued by the first.
#[instrument(skip(conn))]
pub async fn issue_certificate(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
) -> Result<Certificate, AppError> {
    let now = Utc::now();
    let code = generate_certificate_code(now);
    db::insert_certificate(conn, enrollment_id, &code, now).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_prefix_and_suffix() {
        let now = Utc::now();
        let code = generate_certificate_code(now);

        assert!(code.starts_with(CODE_PREFIX));
        assert!(code.len() > CODE_PREFIX.len() + RANDOM_SUFFIX_LEN);
        assert!(
            code[CODE_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn base36_round_trip_of_known_value() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }
}
