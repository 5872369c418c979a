//! Routes toggle requests from page instances to the preference store.

use qm_core::PageKind;
use qm_core::QmError;
use qm_core::QmResult;
use qm_core::config::NavigationConfig;
use qm_core::config::StoreConfig;
use qm_ipc::EndpointRole;
use qm_ipc::ExtensionMessage;
use qm_ipc::LocalEndpoint;
use qm_ipc::local_channel_pair;
use qm_nav::classify_url;
use qm_storage::PreferenceStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

/// Identifies one connected page instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u32);

/// Side effect requested by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Message delivered to an instance's endpoint.
    Message {
        to: InstanceId,
        message: ExtensionMessage,
    },
    /// Full navigation of an instance; performed by the host.
    Navigate { to: InstanceId, url: Url },
}

#[derive(Debug)]
struct Instance {
    endpoint: LocalEndpoint,
    url: Url,
}

#[derive(Debug)]
pub struct ToggleRouter {
    store: Arc<dyn PreferenceStore>,
    store_config: StoreConfig,
    navigation: NavigationConfig,
    destination: Url,
    host_home: Url,
    instances: BTreeMap<InstanceId, Instance>,
    next_id: u32,
}

impl ToggleRouter {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        store_config: StoreConfig,
        navigation: NavigationConfig,
    ) -> QmResult<Self> {
        let destination = navigation.destination_url()?;
        let host_home = Url::parse(&format!("https://{}/", navigation.host)).map_err(|error| {
            QmError::new(
                "router.host_invalid",
                format!("host `{}` does not form a URL: {error}", navigation.host),
            )
        })?;
        Ok(Self {
            store,
            store_config,
            navigation,
            destination,
            host_home,
            instances: BTreeMap::new(),
            next_id: 1,
        })
    }

    /// Installation hook: (re)sets the persisted flag to its default.
    pub fn on_installed(&self) -> QmResult<()> {
        self.store.set(
            &self.store_config.key,
            Value::Bool(self.store_config.default_enabled),
        )?;
        info!(
            key = %self.store_config.key,
            enabled = self.store_config.default_enabled,
            "installed with default preference"
        );
        Ok(())
    }

    /// Registers a page instance and returns its end of the channel.
    pub fn connect(&mut self, url: Url) -> (InstanceId, LocalEndpoint) {
        let (router_side, page_side) = local_channel_pair(EndpointRole::Router, EndpointRole::Page);
        let id = InstanceId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        debug!(instance = id.0, url = %url, "instance connected");
        self.instances.insert(
            id,
            Instance {
                endpoint: router_side,
                url,
            },
        );
        (id, page_side)
    }

    pub fn disconnect(&mut self, id: InstanceId) -> bool {
        self.instances.remove(&id).is_some()
    }

    /// Tracks where an instance currently is; toggles on video pages are
    /// answered in place, elsewhere by navigation.
    pub fn set_url(&mut self, id: InstanceId, url: Url) -> bool {
        match self.instances.get_mut(&id) {
            Some(instance) => {
                instance.url = url;
                true
            }
            None => false,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Handles one message from `from`. Message actions are also delivered.
    pub fn handle(&mut self, from: InstanceId, message: &ExtensionMessage) -> QmResult<Vec<RouterAction>> {
        let sender_url = self
            .instances
            .get(&from)
            .map(|instance| instance.url.clone())
            .ok_or_else(|| {
                QmError::new(
                    "router.instance_unknown",
                    format!("message from unknown instance {}", from.0),
                )
            })?;

        let mut actions = Vec::new();
        match message {
            ExtensionMessage::ToggleSuppression => {
                let current = match self.store.get(&self.store_config.key)? {
                    Some(Value::Bool(enabled)) => enabled,
                    _ => self.store_config.default_enabled,
                };
                let enabled = !current;
                self.store
                    .set(&self.store_config.key, Value::Bool(enabled))?;
                info!(instance = from.0, enabled, "suppression toggled");

                if classify_url(&self.navigation, &sender_url) == PageKind::Watch {
                    actions.push(RouterAction::Message {
                        to: from,
                        message: ExtensionMessage::UpdateSuppression { enabled },
                    });
                } else {
                    let url = if enabled {
                        self.destination.clone()
                    } else {
                        self.host_home.clone()
                    };
                    actions.push(RouterAction::Navigate { to: from, url });
                }

                for id in self.instances.keys().copied().filter(|id| *id != from) {
                    actions.push(RouterAction::Message {
                        to: id,
                        message: ExtensionMessage::UpdateIcon { enabled },
                    });
                }
            }
            ExtensionMessage::NavigateToQuietMode => {
                actions.push(RouterAction::Navigate {
                    to: from,
                    url: self.destination.clone(),
                });
            }
            other => {
                debug!(instance = from.0, action = other.action(), "ignored message");
            }
        }

        self.deliver(&actions);
        Ok(actions)
    }

    /// Handles every queued message from every instance, in instance order.
    pub fn pump(&mut self) -> Vec<RouterAction> {
        let inbound: Vec<(InstanceId, Vec<QmResult<ExtensionMessage>>)> = self
            .instances
            .iter()
            .map(|(id, instance)| (*id, instance.endpoint.drain()))
            .collect();

        let mut actions = Vec::new();
        for (id, messages) in inbound {
            for message in messages {
                let handled = message.and_then(|message| self.handle(id, &message));
                match handled {
                    Ok(mut produced) => actions.append(&mut produced),
                    Err(error) => {
                        warn!(instance = id.0, code = error.code, message = %error.message, "message dropped");
                    }
                }
            }
        }
        actions
    }

    fn deliver(&self, actions: &[RouterAction]) {
        for action in actions {
            let RouterAction::Message { to, message } = action else {
                continue;
            };
            let Some(instance) = self.instances.get(to) else {
                continue;
            };
            if let Err(error) = instance.endpoint.send(message) {
                warn!(instance = to.0, code = error.code, "delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceId;
    use super::RouterAction;
    use super::ToggleRouter;
    use qm_core::config::NavigationConfig;
    use qm_core::config::StoreConfig;
    use qm_ipc::ExtensionMessage;
    use qm_storage::MemoryPreferenceStore;
    use qm_storage::PreferenceStore;
    use serde_json::Value;
    use std::sync::Arc;
    use url::Url;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap_or_else(|_| unreachable!())
    }

    fn router(store: &Arc<MemoryPreferenceStore>) -> ToggleRouter {
        let shared: Arc<dyn PreferenceStore> = store.clone();
        let router = ToggleRouter::new(shared, StoreConfig::default(), NavigationConfig::default());
        assert!(router.is_ok());
        router.unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn install_resets_the_default() {
        let store = Arc::new(MemoryPreferenceStore::new());
        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        let router = router(&store);
        assert!(router.on_installed().is_ok());
        assert_eq!(store.get("noDistractionsEnabled"), Ok(Some(Value::Bool(true))));
    }

    #[test]
    fn toggle_on_watch_page_answers_in_place() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut router = router(&store);
        let (watch, watch_endpoint) = router.connect(url("https://www.youtube.com/watch?v=a"));
        let (search, search_endpoint) = router.connect(url("https://www.youtube.com/results?search_query=x"));

        assert!(watch_endpoint.send(&ExtensionMessage::ToggleSuppression).is_ok());
        let actions = router.pump();
        assert_eq!(
            actions,
            vec![
                RouterAction::Message {
                    to: watch,
                    message: ExtensionMessage::UpdateSuppression { enabled: false },
                },
                RouterAction::Message {
                    to: search,
                    message: ExtensionMessage::UpdateIcon { enabled: false },
                },
            ]
        );
        assert_eq!(store.get("noDistractionsEnabled"), Ok(Some(Value::Bool(false))));
        assert_eq!(
            watch_endpoint.try_recv(),
            Ok(Some(ExtensionMessage::UpdateSuppression { enabled: false }))
        );
        assert_eq!(
            search_endpoint.try_recv(),
            Ok(Some(ExtensionMessage::UpdateIcon { enabled: false }))
        );
    }

    #[test]
    fn toggle_elsewhere_navigates() {
        let store = Arc::new(MemoryPreferenceStore::new());
        assert!(store.set("noDistractionsEnabled", Value::Bool(false)).is_ok());
        let mut router = router(&store);
        let (id, _endpoint) = router.connect(url("https://www.youtube.com/@someone"));

        let actions = router.handle(id, &ExtensionMessage::ToggleSuppression);
        assert_eq!(
            actions,
            Ok(vec![RouterAction::Navigate {
                to: id,
                url: url("https://yt-search-bar.web.app/"),
            }])
        );

        assert!(router.set_url(id, url("https://yt-search-bar.web.app/")));
        let actions = router.handle(id, &ExtensionMessage::ToggleSuppression);
        assert_eq!(
            actions,
            Ok(vec![RouterAction::Navigate {
                to: id,
                url: url("https://www.youtube.com/"),
            }])
        );
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let mut router = router(&store);
        let result = router.handle(InstanceId(42), &ExtensionMessage::NavigateToQuietMode);
        assert!(result.is_err());
        if let Err(error) = result {
            assert_eq!(error.code, "router.instance_unknown");
        }
    }
}
