//! Header rule compilation.
//!
//! Rules follow the declarative net-request shape: a fixed id, a priority,
//! a match condition and an action. Ids are stable across activation
//! cycles so a rule set can always be removed by id.

pub mod compiler;

pub use compiler::{
    compile, HeaderOperation, HeaderRule, HeaderRuleSet, RequestHeader, ResourceType, RuleAction,
    RuleCondition, RULE_ACCEPT_LANGUAGE, RULE_BLOCK_SUBFRAMES, RULE_IDS, RULE_PLATFORM,
    RULE_TIMEZONE, RULE_USER_AGENT, TIMEZONE_HEADER,
};
