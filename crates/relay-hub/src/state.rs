//! Application state

use std::sync::Arc;

use crate::auth::AuthClient;
use crate::credentials::CredentialStore;
use crate::room::RoomRegistry;

/// Shared hub state
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomRegistry>,
    pub auth: Arc<AuthClient>,
    pub credentials: Arc<CredentialStore>,
}
