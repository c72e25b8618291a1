//! Compile an identity profile into the header rule set.

use serde::{Deserialize, Serialize};

use crate::model::IdentityProfile;

pub const RULE_ACCEPT_LANGUAGE: u32 = 1;
pub const RULE_TIMEZONE: u32 = 2;
pub const RULE_USER_AGENT: u32 = 3;
pub const RULE_PLATFORM: u32 = 4;
pub const RULE_BLOCK_SUBFRAMES: u32 = 5;

/// Every id this compiler can emit, in install order.
pub const RULE_IDS: [u32; 5] = [
    RULE_ACCEPT_LANGUAGE,
    RULE_TIMEZONE,
    RULE_USER_AGENT,
    RULE_PLATFORM,
    RULE_BLOCK_SUBFRAMES,
];

/// Custom request header carrying the spoofed IANA timezone.
pub const TIMEZONE_HEADER: &str = "Time-Zone";

/// Request resource categories a rule condition can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Webtransport,
    Webbundle,
    Other,
}

impl ResourceType {
    pub const ALL: [ResourceType; 15] = [
        ResourceType::MainFrame,
        ResourceType::SubFrame,
        ResourceType::Stylesheet,
        ResourceType::Script,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Object,
        ResourceType::Xmlhttprequest,
        ResourceType::Ping,
        ResourceType::CspReport,
        ResourceType::Media,
        ResourceType::Websocket,
        ResourceType::Webtransport,
        ResourceType::Webbundle,
        ResourceType::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub header: String,
    pub operation: HeaderOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    #[serde(rename_all = "camelCase")]
    ModifyHeaders { request_headers: Vec<RequestHeader> },
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

/// One declarative rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl HeaderRule {
    fn set_header(id: u32, header: &str, value: &str) -> Self {
        Self {
            id,
            priority: 1,
            action: RuleAction::ModifyHeaders {
                request_headers: vec![RequestHeader {
                    header: header.to_string(),
                    operation: HeaderOperation::Set,
                    value: Some(value.to_string()),
                }],
            },
            condition: RuleCondition {
                url_filter: "*".to_string(),
                resource_types: ResourceType::ALL.to_vec(),
            },
        }
    }

    fn block_subframes() -> Self {
        Self {
            id: RULE_BLOCK_SUBFRAMES,
            priority: 1,
            action: RuleAction::Block,
            condition: RuleCondition {
                url_filter: "|http".to_string(),
                resource_types: vec![ResourceType::SubFrame],
            },
        }
    }

    /// Whether the condition covers a request of this type and URL.
    pub fn matches(&self, resource_type: ResourceType, url: &str) -> bool {
        if !self.condition.resource_types.contains(&resource_type) {
            return false;
        }
        match self.condition.url_filter.as_str() {
            "*" => true,
            filter => match filter.strip_prefix('|') {
                Some(prefix) => url.starts_with(prefix),
                None => url.contains(filter),
            },
        }
    }
}

/// An ordered set of rules that is installed and removed as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRuleSet {
    pub rules: Vec<HeaderRule>,
}

impl HeaderRuleSet {
    pub fn ids(&self) -> Vec<u32> {
        self.rules.iter().map(|r| r.id).collect()
    }

    pub fn get(&self, id: u32) -> Option<&HeaderRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Drop the network-level sub-frame block.
    pub fn without_subframe_block(mut self) -> Self {
        self.rules.retain(|r| r.id != RULE_BLOCK_SUBFRAMES);
        self
    }

    /// Headers to set on a matching request, in rule order.
    pub fn request_headers(&self, resource_type: ResourceType, url: &str) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(resource_type, url)) {
            if let RuleAction::ModifyHeaders { request_headers } = &rule.action {
                for h in request_headers {
                    if let (HeaderOperation::Set, Some(value)) = (h.operation, &h.value) {
                        headers.push((h.header.clone(), value.clone()));
                    }
                }
            }
        }
        headers
    }

    /// Whether any block rule matches the request.
    pub fn blocks(&self, resource_type: ResourceType, url: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.action == RuleAction::Block && r.matches(resource_type, url))
    }
}

/// Build the rule set for a profile.
///
/// The four header rules touch distinct headers, so their application order
/// does not matter. The sub-frame block does not depend on the profile.
pub fn compile(profile: &IdentityProfile) -> HeaderRuleSet {
    let platform_hint = format!("\"{}\"", profile.platform.client_hint());
    HeaderRuleSet {
        rules: vec![
            HeaderRule::set_header(RULE_ACCEPT_LANGUAGE, "Accept-Language", &profile.language),
            HeaderRule::set_header(RULE_TIMEZONE, TIMEZONE_HEADER, &profile.timezone),
            HeaderRule::set_header(RULE_USER_AGENT, "User-Agent", &profile.user_agent),
            HeaderRule::set_header(RULE_PLATFORM, "sec-ch-ua-platform", &platform_hint),
            HeaderRule::block_subframes(),
        ],
    }
}
