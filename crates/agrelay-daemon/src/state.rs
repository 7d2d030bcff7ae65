use std::sync::Arc;

use agrelay_runtime::Daemon;

use crate::push::PushStore;

/// Shared handler state: the one runtime value plus transport-only
/// concerns (token, push store). Holds no coordinator state of its own.
#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<Daemon>,
    pub token: Arc<str>,
    pub push: Arc<PushStore>,
}

impl AppState {
    pub fn new(daemon: Arc<Daemon>, token: String, push: PushStore) -> Self {
        Self {
            daemon,
            token: token.into(),
            push: Arc::new(push),
        }
    }
}
