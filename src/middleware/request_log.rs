use super::{Interceptor, RequestContext};
use crate::error::AppResult;

/// RequestLog
///
/// Emits one debug line per admitted request. Never fails.
pub struct RequestLog;

impl Interceptor for RequestLog {
    fn intercept(&self, ctx: RequestContext) -> AppResult<RequestContext> {
        match ctx.identity {
            Some(identity) => tracing::debug!(
                method = %ctx.method,
                path = %ctx.path,
                request_id = ctx.request_id.as_deref().unwrap_or("unknown"),
                user_id = identity.user_id,
                role = %identity.role,
                "request admitted"
            ),
            None => tracing::debug!(
                method = %ctx.method,
                path = %ctx.path,
                request_id = ctx.request_id.as_deref().unwrap_or("unknown"),
                "request admitted"
            ),
        }
        Ok(ctx)
    }
}
