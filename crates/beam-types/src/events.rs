use serde::{Deserialize, Serialize};

/// Events sent over the registry WebSocket, server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum RegistryEvent {
    /// The full set of registered identifiers, sorted. Replaces the client's
    /// local view of available peers; never a delta.
    ///
    /// The set includes the receiving client's own identifier. Filtering it
    /// out is up to whoever renders the list.
    PresenceUpdate { peers: Vec<String> },
}

impl RegistryEvent {
    pub fn peers(&self) -> &[String] {
        match self {
            Self::PresenceUpdate { peers } => peers,
        }
    }
}

/// Commands sent FROM client TO registry over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum RegistryCommand {
    /// Announce this connection under `identifier`. Re-registering an
    /// identifier replaces whichever connection held it before.
    Register { identifier: String },

    /// Ask for the current peer set. Answered to the caller only.
    Query,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_wire_format() {
        let cmd = RegistryCommand::Register {
            identifier: "alice".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"register","data":{"identifier":"alice"}}"#);
    }

    #[test]
    fn query_has_no_payload() {
        let cmd: RegistryCommand = serde_json::from_str(r#"{"type":"query"}"#).unwrap();
        assert_eq!(cmd, RegistryCommand::Query);
    }

    #[test]
    fn presence_update_wire_format() {
        let event = RegistryEvent::PresenceUpdate {
            peers: vec!["alice".into(), "bob".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"presence-update","data":{"peers":["alice","bob"]}}"#
        );

        let back: RegistryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.peers(), ["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<RegistryCommand>(r#"{"type":"shout"}"#).is_err());
    }
}
