use super::{Access, Interceptor, RequestContext};
use crate::error::{AppError, AppResult};

/// Authorize
///
/// Checks the resolved identity's role against the route group's role set.
pub struct Authorize;

impl Interceptor for Authorize {
    fn intercept(&self, ctx: RequestContext) -> AppResult<RequestContext> {
        let Access::Roles(allowed) = ctx.access else {
            return Ok(ctx);
        };

        let identity = ctx
            .identity
            .ok_or_else(|| AppError::unauthorized("authentication required"))?;

        if !allowed.contains(&identity.role) {
            let names: Vec<&str> = allowed.iter().map(|role| role.as_str()).collect();
            return Err(AppError::forbidden(format!(
                "this action requires one of the roles: {}",
                names.join(", ")
            )));
        }
        Ok(ctx)
    }
}
