use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::SESSION_KEY_STAFF_ID;
use crate::error::AppError;

/// Extension holding the staff member making the request
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedStaff {
    pub staff_id: Uuid,
}

/// Middleware that requires a signed-in staff member
pub async fn require_staff(
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let staff_id: Uuid = session
        .get(SESSION_KEY_STAFF_ID)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?
        .ok_or(AppError::Unauthorized)?;

    tracing::debug!(staff_id = %staff_id, "Staff request authenticated");
    request
        .extensions_mut()
        .insert(AuthenticatedStaff { staff_id });

    Ok(next.run(request).await)
}
