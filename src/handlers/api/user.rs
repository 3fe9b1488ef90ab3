use axum::extract::State;
use serde::Serialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{AuthUser, Json};
use crate::models::User;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

/// `GET /api/user` - the authenticated user's account, including the
/// current credit balance. Creates the record on first contact.
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<UserResponse>> {
    let mut conn = state.db.get()?;
    let user = super::resolve_user(&state, &mut conn, &identity)?;
    Ok(Json(UserResponse { user }))
}
