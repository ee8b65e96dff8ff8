use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use pbxwatch_types::TenantId;

/// Header carrying the caller's tenant, set by the authenticating proxy.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Tenant of the current request, stored in request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TenantContext(pub TenantId);

/// Reads the tenant from [`TENANT_HEADER`].
///
/// Returns `None` when the header is absent, not UTF-8, or not a positive
/// integer.
pub fn tenant_from_headers(headers: &HeaderMap) -> Option<TenantId> {
    let raw = headers.get(TENANT_HEADER)?.to_str().ok()?;
    parse_tenant(raw)
}

pub(crate) fn parse_tenant(raw: &str) -> Option<TenantId> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(TenantId)
}

/// Middleware that requires a tenant on every request.
///
/// Token verification happens upstream; this layer only trusts the header
/// the authenticating proxy sets.
pub async fn tenant_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let tenant = tenant_from_headers(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(TenantContext(tenant));
    Ok(next.run(req).await)
}
