use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use parlor_types::actor::{Actor, Claims};

use crate::error::ApiError;
use crate::state::AppState;

/// Validate the bearer JWT, mirror the caller into the user directory and
/// hand the `Actor` to handlers through request extensions. A missing or
/// malformed `Authorization` header is a 401 like a bad token.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| ApiError::Unauthorized)?;
    let actor = decode_actor(bearer.token(), &state.jwt_secret).ok_or(ApiError::Unauthorized)?;

    state.service.ensure_user(&actor).await?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

pub fn decode_actor(token: &str, secret: &str) -> Option<Actor> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some(Actor::from(token_data.claims))
}

/// Sign a token for `actor`. Identity is issued elsewhere in production;
/// this exists for local tooling and tests.
pub fn issue_token(actor: &Actor, secret: &str, ttl: Duration) -> anyhow::Result<String> {
    let exp = chrono::Utc::now() + chrono::Duration::from_std(ttl)?;
    let claims = Claims {
        sub: actor.id,
        username: actor.username.clone(),
        role: actor.role,
        exp: exp.timestamp() as usize,
    };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn token_round_trips_role() {
        let actor = Actor::admin(Uuid::new_v4(), "root");
        let token = issue_token(&actor, "secret", Duration::from_secs(60)).unwrap();
        assert_eq!(decode_actor(&token, "secret"), Some(actor));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let actor = Actor::member(Uuid::new_v4(), "ana");
        let token = issue_token(&actor, "secret", Duration::from_secs(60)).unwrap();
        assert_eq!(decode_actor(&token, "other"), None);
    }
}
