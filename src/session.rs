//! Credential store: the current access/refresh tokens and the identity
//! decoded from the access token.
//!
//! Every mutation re-derives the identity explicitly and is mirrored to
//! [`SessionStorage`] before it returns. An access token that cannot be
//! decoded never leaves a stale identity behind: the session is logged out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::{decode_claims, decode_identity, Identity, IdentityUpdate, Role};
use crate::events::{Alert, Event, EventBus, EventKind, SubscriptionId};
use crate::storage::{SessionStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, USER_KEY};

/// Routing collaborator. The store only ever asks it to go to the
/// unauthenticated entry point after a logout.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, route: &str) {
        self(route)
    }
}

#[derive(Debug, Default)]
struct Credentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
    identity: Option<Identity>,
}

pub struct SessionStore {
    state: Mutex<Credentials>,
    storage: Arc<dyn SessionStorage>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

impl SessionStore {
    /// Build the store from whatever `storage` holds.
    ///
    /// The cached identity is ignored; it is decoded again from the stored
    /// access token, and an undecodable token logs the session out.
    pub fn restore(
        storage: Arc<dyn SessionStorage>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        let store = Self {
            state: Mutex::new(Credentials::default()),
            storage,
            navigator,
            login_route: login_route.into(),
        };

        let access = store.storage.get(ACCESS_TOKEN_KEY);
        let refresh = store.storage.get(REFRESH_TOKEN_KEY);
        match access {
            Some(access) => store.apply(&access, refresh.as_deref()),
            None => {
                store.lock().refresh_token = refresh;
                store.remove_entry(USER_KEY);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Credentials> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a fresh credential pair (after login)
    pub fn set_tokens(&self, access: &str, refresh: &str) {
        self.apply(access, Some(refresh));
    }

    /// Replace only the access token (after a refresh)
    pub fn set_access_token(&self, access: &str) {
        self.apply(access, None);
    }

    fn apply(&self, access: &str, refresh: Option<&str>) {
        let identity = match decode_identity(access) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode access token, logging out");
                self.logout();
                return;
            }
        };

        {
            // Storage is written under the state lock so memory and disk
            // never disagree.
            let mut state = self.lock();
            state.access_token = Some(access.to_string());
            self.write_entry(ACCESS_TOKEN_KEY, access);
            if let Some(refresh) = refresh {
                state.refresh_token = Some(refresh.to_string());
                self.write_entry(REFRESH_TOKEN_KEY, refresh);
            }
            self.write_identity(&identity);
            state.identity = Some(identity.clone());
        }

        tracing::info!(
            user_id = identity.user_id(),
            role = identity.role().as_str(),
            rotated_refresh = refresh.is_some(),
            "Session credentials updated"
        );
    }

    /// Clear credentials and identity from memory and storage, then navigate
    /// to the login route. Safe to call when already logged out.
    pub fn logout(&self) {
        let had_session = {
            let mut state = self.lock();
            let had_session = state.access_token.is_some() || state.refresh_token.is_some();
            *state = Credentials::default();
            if let Err(e) = self.storage.remove_all(&SESSION_KEYS) {
                tracing::error!(error = %e, "Failed to clear persisted session");
            }
            had_session
        };

        if had_session {
            tracing::info!("Session cleared");
        } else {
            tracing::debug!("Logout requested with no active session");
        }
        self.navigator.navigate(&self.login_route);
    }

    /// Forced logout: tear the session down and raise exactly one
    /// session-expired alert.
    pub fn expire(&self, events: &EventBus) {
        tracing::warn!("Session expired, forcing logout");
        self.logout();
        events.publish(Event::SessionExpiredAlert(Alert::session_expired()));
    }

    /// Subscribe this store to [`EventKind::Unauthorized`], so publishing that
    /// event anywhere forces a logout.
    pub fn listen(self: &Arc<Self>, events: &EventBus) -> SubscriptionId {
        let store = Arc::downgrade(self);
        let bus = events.downgrade();
        events.subscribe(EventKind::Unauthorized, move |_| {
            if let (Some(store), Some(bus)) = (store.upgrade(), bus.upgrade()) {
                tracing::info!("Unauthorized event received");
                store.expire(&bus);
            }
        })
    }

    /// Patch the cached identity after a profile edit. No-op when logged out.
    pub fn update_identity(&self, update: IdentityUpdate) {
        let mut state = self.lock();
        let Some(identity) = state.identity.as_mut() else {
            return;
        };
        identity.apply(update);
        let identity = identity.clone();
        self.write_identity(&identity);
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.lock();
        state.access_token.is_some() && state.identity.is_some()
    }

    /// `None` when logged out
    pub fn role(&self) -> Option<Role> {
        self.lock().identity.as_ref().map(Identity::role)
    }

    pub fn is_author(&self) -> bool {
        self.role() == Some(Role::Author)
    }

    /// True if the stored access token has not reached its `exp` yet
    pub fn has_live_access_token(&self) -> bool {
        match self.access_token() {
            Some(token) => decode_claims(&token).map_or(false, |claims| !claims.is_expired()),
            None => false,
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    fn write_entry(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            tracing::error!(key = key, error = %e, "Failed to persist session entry");
        }
    }

    fn write_identity(&self, identity: &Identity) {
        match serde_json::to_string(identity) {
            Ok(json) => self.write_entry(USER_KEY, &json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize identity"),
        }
    }

    fn remove_entry(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            tracing::error!(key = key, error = %e, "Failed to remove session entry");
        }
    }
}
