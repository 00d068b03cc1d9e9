//! Webhook token routing.

use autoflow_types::automation::WebhookTriggerConfig;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

/// Length of a webhook token in hex characters.
pub const TOKEN_LEN: usize = 64;

/// A fresh 64-character hex token.
///
/// Built from two v4 UUIDs, which draw from the OS random source.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Maps enabled webhook tokens to their automation.
///
/// Disabled bindings are not routed; the token stays on the automation so
/// the binding can be inspected, but only re-enabling (which rotates the
/// token) makes it reachable again.
#[derive(Debug, Default)]
pub struct WebhookRouter {
    routes: DashMap<String, Uuid>,
    by_automation: DashMap<Uuid, String>,
}

impl WebhookRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `config.token` to `automation_id`, replacing any previous token
    /// of that automation. A disabled config only removes the old route.
    ///
    /// Both maps change while the automation's entry is held, so concurrent
    /// binds of one automation never leave a stray route behind.
    pub fn bind(&self, automation_id: Uuid, config: &WebhookTriggerConfig) {
        let routed = config.enabled && !config.token.is_empty();
        match self.by_automation.entry(automation_id) {
            Entry::Occupied(mut slot) => {
                self.routes.remove(slot.get());
                if routed {
                    self.routes.insert(config.token.clone(), automation_id);
                    slot.insert(config.token.clone());
                } else {
                    slot.remove();
                    return;
                }
            }
            Entry::Vacant(slot) => {
                if !routed {
                    return;
                }
                self.routes.insert(config.token.clone(), automation_id);
                slot.insert(config.token.clone());
            }
        }
        tracing::debug!(%automation_id, "webhook route bound");
    }

    /// Stop routing the automation's token. Returns whether a route existed.
    pub fn unbind(&self, automation_id: Uuid) -> bool {
        match self.by_automation.remove(&automation_id) {
            Some((_, token)) => {
                self.routes.remove(&token);
                true
            }
            None => false,
        }
    }

    pub fn resolve(&self, token: &str) -> Option<Uuid> {
        self.routes.get(token).map(|id| *id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&self) {
        self.routes.clear();
        self.by_automation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str, enabled: bool) -> WebhookTriggerConfig {
        WebhookTriggerConfig {
            token: token.to_string(),
            enabled,
        }
    }

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn rebinding_replaces_the_old_token() {
        let router = WebhookRouter::new();
        let id = Uuid::now_v7();
        router.bind(id, &config("old", true));
        router.bind(id, &config("new", true));
        assert_eq!(router.resolve("old"), None);
        assert_eq!(router.resolve("new"), Some(id));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn concurrent_rebinds_leave_one_route() {
        let router = WebhookRouter::new();
        let id = Uuid::now_v7();
        std::thread::scope(|s| {
            for worker in 0..8 {
                let router = &router;
                s.spawn(move || {
                    for i in 0..200 {
                        router.bind(id, &config(&format!("tok-{worker}-{i}"), true));
                    }
                });
            }
        });

        assert_eq!(router.len(), 1);
        let token = router.by_automation.get(&id).map(|t| t.clone()).unwrap();
        assert_eq!(router.resolve(&token), Some(id));
    }

    #[test]
    fn disabled_bindings_do_not_route() {
        let router = WebhookRouter::new();
        let id = Uuid::now_v7();
        router.bind(id, &config("tok", true));
        router.bind(id, &config("tok", false));
        assert_eq!(router.resolve("tok"), None);
        assert!(router.is_empty());
        assert!(!router.unbind(id));
    }
}
