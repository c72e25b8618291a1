//! Inbound controller messages and their acknowledgment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GeomaskError;
use crate::model::proxy::port_from_any;
use crate::model::{Feature, FeatureToggle};

/// One request to the controller, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    ActivateProxy {
        host: String,
        #[serde(deserialize_with = "port_from_any")]
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    DeactivateProxy {
        host: String,
        #[serde(deserialize_with = "port_from_any")]
        port: u16,
    },
    DeactivateAllProxies,
    ActivateHeaders {
        host: String,
        #[serde(deserialize_with = "port_from_any")]
        port: u16,
        #[serde(default)]
        language: String,
        #[serde(default)]
        timezone: String,
    },
    DeactivateHeaders,
    ActivateContentScript,
    DeactivateContentScript,
    SetToggle {
        feature: Feature,
        state: FeatureToggle,
    },
    SetUserAgent {
        #[serde(rename = "userAgent", default, skip_serializing_if = "Option::is_none")]
        user_agent: Option<String>,
    },
    Status,
    OpenTab {
        url: String,
    },
    AddProxies {
        lines: Vec<String>,
    },
    RemoveProxy {
        host: String,
        #[serde(deserialize_with = "port_from_any")]
        port: u16,
    },
    ClearProxies,
    ListProxies,
    /// Exempt a hostname from frame removal.
    AllowFrames {
        host: String,
    },
    DisallowFrames {
        host: String,
    },
}

impl Message {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ActivateProxy { .. } => "activateProxy",
            Message::DeactivateProxy { .. } => "deactivateProxy",
            Message::DeactivateAllProxies => "deactivateAllProxies",
            Message::ActivateHeaders { .. } => "activateHeaders",
            Message::DeactivateHeaders => "deactivateHeaders",
            Message::ActivateContentScript => "activateContentScript",
            Message::DeactivateContentScript => "deactivateContentScript",
            Message::SetToggle { .. } => "setToggle",
            Message::SetUserAgent { .. } => "setUserAgent",
            Message::Status => "status",
            Message::OpenTab { .. } => "openTab",
            Message::AddProxies { .. } => "addProxies",
            Message::RemoveProxy { .. } => "removeProxy",
            Message::ClearProxies => "clearProxies",
            Message::ListProxies => "listProxies",
            Message::AllowFrames { .. } => "allowFrames",
            Message::DisallowFrames { .. } => "disallowFrames",
        }
    }
}

/// Acknowledgment returned for every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            result: None,
        }
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::ok()
        }
    }

    pub fn failed(err: &GeomaskError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_port_may_be_string() {
        let msg: Message =
            serde_json::from_value(json!({"type": "activateProxy", "host": "1.2.3.4", "port": "8080"})).unwrap();
        assert_eq!(
            msg,
            Message::ActivateProxy {
                host: "1.2.3.4".into(),
                port: 8080,
                username: None,
                password: None
            }
        );
    }

    #[test]
    fn test_unit_and_field_messages() {
        let msg: Message = serde_json::from_value(json!({"type": "deactivateAllProxies"})).unwrap();
        assert_eq!(msg, Message::DeactivateAllProxies);

        let msg: Message = serde_json::from_value(json!({
            "type": "activateHeaders", "host": "h", "port": 1
        }))
        .unwrap();
        assert_eq!(
            msg,
            Message::ActivateHeaders {
                host: "h".into(),
                port: 1,
                language: String::new(),
                timezone: String::new()
            }
        );

        let msg: Message = serde_json::from_value(json!({
            "type": "setToggle", "feature": "webRTC", "state": "disabled"
        }))
        .unwrap();
        assert_eq!(msg.kind(), "setToggle");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_value::<Message>(json!({"type": "reboot"})).is_err());
    }

    #[test]
    fn test_failed_ack_carries_code() {
        let ack = Ack::failed(&GeomaskError::Precondition("activate the proxy first".into()));
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(
            value,
            json!({"success": false, "error": "activate the proxy first", "code": "precondition"})
        );
    }
}
