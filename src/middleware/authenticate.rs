use super::{Access, Interceptor, RequestContext};
use crate::{
    auth::{Identity, JwtKeys, TokenKind, bearer_token},
    error::{AppError, AppResult},
};

/// Authenticate
///
/// Resolves the bearer token of a non-public request into an `Identity`.
/// Only access tokens are accepted.
pub struct Authenticate {
    keys: JwtKeys,
}

impl Authenticate {
    pub fn new(keys: JwtKeys) -> Self {
        Self { keys }
    }
}

impl Interceptor for Authenticate {
    fn intercept(&self, mut ctx: RequestContext) -> AppResult<RequestContext> {
        if ctx.access == Access::Public {
            return Ok(ctx);
        }

        let header = ctx
            .authorization
            .as_deref()
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
        let token = bearer_token(header)
            .ok_or_else(|| AppError::unauthorized("authorization header must be `Bearer <token>`"))?;

        let claims = self.keys.verify(token, TokenKind::Access)?;
        ctx.identity = Some(Identity {
            user_id: claims.user_id()?,
            role: claims.role,
        });
        Ok(ctx)
    }
}
