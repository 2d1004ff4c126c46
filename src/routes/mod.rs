// Route module decomposition, as the teacher lays it out: shared state and
// guards live here, route functions in per-domain submodules.

mod channels;
mod sessions;
mod system;
mod templates;
mod tenants;

pub use channels::create_channel;
pub use sessions::{create_session, delete_session, get_session, list_sessions, update_session};
pub use system::{health, not_found};
pub use templates::create_template;
pub use tenants::{create_tenant, get_tenant};

use std::sync::Arc;

use crate::broker::Broker;
use crate::cache::Cache;
use crate::store::Store;

/// Managed state bundling the three collaborators every route needs —
/// mirrors the teacher's pattern of `.manage(db)` / `.manage(events)` as
/// separate pieces of Rocket-managed state.
pub struct AppState {
    pub store: Arc<Store>,
    pub broker: Arc<Broker>,
    pub cache: Arc<Cache>,
}
