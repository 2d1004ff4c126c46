//! Session Binder (§4.H): binds the caller's allowed tenant ids for the
//! lifetime of a request/task so the storage engine — not application code —
//! enforces isolation.
//!
//! Grounded structurally on the teacher's request-guard pattern
//! (`routes/mod.rs`'s `ClientIp`/`AdminKey` `FromRequest` impls): a small
//! type extracted from the request that downstream code reads out of
//! managed/task-local state rather than re-deriving per call site.

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

tokio::task_local! {
    static BOUND_TENANT_IDS: Vec<String>;
}

/// Runs `f` with `tenant_external_ids` bound for the duration of the future.
/// Any `Store::begin_bound(None)` call made inside `f` picks this up
/// automatically via `current()`.
pub async fn bind<F, Fut, T>(tenant_external_ids: Vec<String>, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    BOUND_TENANT_IDS.scope(tenant_external_ids, f()).await
}

/// Reads the currently bound tenant ids, if any. Daemons never bind, so
/// `Store::begin_bound(None)` is what they pass — see §4.H: "daemons do not
/// bind, they need to see all tenants."
pub fn current() -> Option<Vec<String>> {
    BOUND_TENANT_IDS.try_with(|ids| ids.clone()).ok()
}

/// Request guard carrying the tenant external id(s) a caller is authorized
/// for, derived from whatever upstream auth middleware attaches to the
/// request (out of scope here per §1 — OAuth exchange is external
/// plumbing). Routes call `bind(guard.0, || async { ... }).await` to scope
/// every Store call they make.
pub struct TenantScope(pub Vec<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TenantScope {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one("X-Tenant-Ids") {
            Some(raw) => {
                let ids = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>();
                if ids.is_empty() {
                    Outcome::Forward(Status::Unauthorized)
                } else {
                    Outcome::Success(TenantScope(ids))
                }
            }
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}
