//! Cross-instance notification channel: typed messages carried as JSON text
//! over in-process endpoints.

use qm_core::QmError;
use qm_core::QmResult;
use serde::Deserialize;
use serde::Serialize;
use std::sync::mpsc;
use std::time::Duration;

/// Which side of the channel an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// The single instance that owns the preference store and routes toggles.
    Router,
    /// One attached page instance.
    Page,
}

impl EndpointRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Page => "page",
        }
    }
}

/// Messages exchanged between page instances and the router. The JSON shape
/// is `{"action": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtensionMessage {
    /// Asks the router to flip the persisted flag.
    ToggleSuppression,
    /// Pushes the resolved value to the instance that asked for the toggle.
    UpdateSuppression { enabled: bool },
    /// Presentation refresh only; the receiving page does not reconcile.
    UpdateIcon { enabled: bool },
    /// Asks the router to send the sender to the quiet destination.
    NavigateToQuietMode,
}

impl ExtensionMessage {
    pub fn action(&self) -> &'static str {
        match self {
            Self::ToggleSuppression => "toggleSuppression",
            Self::UpdateSuppression { .. } => "updateSuppression",
            Self::UpdateIcon { .. } => "updateIcon",
            Self::NavigateToQuietMode => "navigateToQuietMode",
        }
    }
}

/// One side of an in-process channel. Messages cross it as JSON text, the
/// same shape a real extension message bus carries.
#[derive(Debug)]
pub struct LocalEndpoint {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
    role: EndpointRole,
}

impl LocalEndpoint {
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn send(&self, message: &ExtensionMessage) -> QmResult<()> {
        let text = encode_message(message)?;
        self.tx.send(text).map_err(|error| {
            QmError::new(
                "ipc.send_failed",
                format!(
                    "failed to send `{}` from {} endpoint: {error}",
                    message.action(),
                    self.role.as_str()
                ),
            )
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> QmResult<ExtensionMessage> {
        let text = self.rx.recv_timeout(timeout).map_err(|error| {
            QmError::new(
                "ipc.recv_failed",
                format!(
                    "no message for {} endpoint: {error}",
                    self.role.as_str()
                ),
            )
        })?;
        decode_message(&text)
    }

    /// Non-blocking receive. `Ok(None)` means nothing is queued.
    pub fn try_recv(&self) -> QmResult<Option<ExtensionMessage>> {
        match self.rx.try_recv() {
            Ok(text) => decode_message(&text).map(Some),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(QmError::new(
                "ipc.peer_disconnected",
                format!("peer of {} endpoint went away", self.role.as_str()),
            )),
        }
    }

    /// Drains every queued message; decoding failures are returned inline.
    pub fn drain(&self) -> Vec<QmResult<ExtensionMessage>> {
        let mut out = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(message)) => out.push(Ok(message)),
                Ok(None) => break,
                Err(error) if error.code == "ipc.peer_disconnected" => break,
                Err(error) => out.push(Err(error)),
            }
        }
        out
    }

    #[cfg(test)]
    fn send_raw(&self, text: &str) -> bool {
        self.tx.send(text.to_owned()).is_ok()
    }
}

/// Creates two connected endpoints.
pub fn local_channel_pair(left: EndpointRole, right: EndpointRole) -> (LocalEndpoint, LocalEndpoint) {
    let (left_tx, right_rx) = mpsc::channel();
    let (right_tx, left_rx) = mpsc::channel();
    (
        LocalEndpoint {
            tx: left_tx,
            rx: left_rx,
            role: left,
        },
        LocalEndpoint {
            tx: right_tx,
            rx: right_rx,
            role: right,
        },
    )
}

pub fn encode_message(message: &ExtensionMessage) -> QmResult<String> {
    serde_json::to_string(message).map_err(|error| {
        QmError::new(
            "ipc.message_encode_failed",
            format!("failed to encode `{}`: {error}", message.action()),
        )
    })
}

pub fn decode_message(text: &str) -> QmResult<ExtensionMessage> {
    if text.trim().is_empty() {
        return Err(QmError::new("ipc.message_empty", "message text is empty"));
    }

    serde_json::from_str(text).map_err(|error| {
        QmError::new(
            "ipc.message_invalid",
            format!("not a known message: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::EndpointRole;
    use super::ExtensionMessage;
    use super::decode_message;
    use super::encode_message;
    use super::local_channel_pair;
    use std::time::Duration;

    #[test]
    fn messages_use_the_action_tagged_json_shape() {
        let json = encode_message(&ExtensionMessage::UpdateSuppression { enabled: false });
        assert_eq!(
            json.ok().as_deref(),
            Some(r#"{"action":"updateSuppression","enabled":false}"#)
        );

        assert_eq!(
            decode_message(r#"{"action":"toggleSuppression"}"#),
            Ok(ExtensionMessage::ToggleSuppression)
        );
        assert_eq!(ExtensionMessage::NavigateToQuietMode.action(), "navigateToQuietMode");
    }

    #[test]
    fn unknown_or_empty_messages_are_rejected() {
        let unknown = decode_message(r#"{"action":"reload"}"#);
        assert!(unknown.is_err());
        if let Err(error) = unknown {
            assert_eq!(error.code, "ipc.message_invalid");
        }

        let missing_field = decode_message(r#"{"action":"updateIcon"}"#);
        assert!(missing_field.is_err());

        let empty = decode_message("  ");
        assert!(empty.is_err());
        if let Err(error) = empty {
            assert_eq!(error.code, "ipc.message_empty");
        }
    }

    #[test]
    fn local_channel_sends_and_receives() {
        let (router, page) = local_channel_pair(EndpointRole::Router, EndpointRole::Page);
        assert_eq!(router.role(), EndpointRole::Router);
        assert_eq!(page.role().as_str(), "page");

        assert_eq!(page.try_recv(), Ok(None));
        assert!(page.send(&ExtensionMessage::ToggleSuppression).is_ok());
        assert_eq!(
            router.recv_timeout(Duration::from_secs(1)),
            Ok(ExtensionMessage::ToggleSuppression)
        );

        assert!(router.send(&ExtensionMessage::UpdateIcon { enabled: false }).is_ok());
        assert!(router.send(&ExtensionMessage::UpdateSuppression { enabled: false }).is_ok());
        let drained = page.drain();
        assert_eq!(
            drained,
            vec![
                Ok(ExtensionMessage::UpdateIcon { enabled: false }),
                Ok(ExtensionMessage::UpdateSuppression { enabled: false }),
            ]
        );
    }

    #[test]
    fn drain_reports_bad_text_inline_and_keeps_going() {
        let (router, page) = local_channel_pair(EndpointRole::Router, EndpointRole::Page);
        assert!(router.send_raw("{not json"));
        assert!(router.send(&ExtensionMessage::UpdateIcon { enabled: true }).is_ok());

        let drained = page.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].is_err());
        assert_eq!(drained[1], Ok(ExtensionMessage::UpdateIcon { enabled: true }));
    }

    #[test]
    fn dropped_peer_ends_the_drain() {
        let (router, page) = local_channel_pair(EndpointRole::Router, EndpointRole::Page);
        assert!(router.send(&ExtensionMessage::UpdateIcon { enabled: true }).is_ok());
        drop(router);

        assert_eq!(page.drain(), vec![Ok(ExtensionMessage::UpdateIcon { enabled: true })]);
        let after = page.try_recv();
        assert!(after.is_err());
        if let Err(error) = after {
            assert_eq!(error.code, "ipc.peer_disconnected");
        }
    }
}
