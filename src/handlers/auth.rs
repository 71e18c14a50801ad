// src/handlers/auth.rs
//! Caller identity. The gateway in front of this service authenticates the user and
//! forwards who they are in `x-user-id` and `x-user-role`.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{
    errors::SparrowError,
    models::identity::{Principal, Role},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, SparrowError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| SparrowError::unauthorized(format!("Missing {} header", name)))?
        .to_str()
        .map(str::trim)
        .map_err(|_| SparrowError::unauthorized(format!("Malformed {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = SparrowError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)?;
        if id.is_empty() {
            return Err(SparrowError::unauthorized("Empty user id"));
        }
        let role: Role = header(parts, USER_ROLE_HEADER)?.parse()?;
        Ok(Principal::new(id, role))
    }
}
