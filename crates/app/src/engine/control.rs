//! Control topics carrying live rule and parameter updates.

use mqttrules_domain::id::RuleId;

/// A message on one of the control topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlMessage<'a> {
    /// `<prefix>rule/<ruleset>/<rule>`
    Rule(RuleId),
    /// `<prefix>param/<name>`
    Parameter(&'a str),
}

#[derive(Debug, Clone)]
pub(crate) struct ControlTopics {
    prefix: String,
}

impl ControlTopics {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Subscription filters covering every control topic.
    pub(crate) fn filters(&self) -> [String; 2] {
        [
            format!("{}rule/+/+", self.prefix),
            format!("{}param/+", self.prefix),
        ]
    }

    pub(crate) fn parse<'a>(&self, topic: &'a str) -> Option<ControlMessage<'a>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        if let Some(path) = rest.strip_prefix("rule/") {
            let (ruleset, rule) = path.split_once('/')?;
            if ruleset.is_empty() || rule.is_empty() || rule.contains('/') {
                return None;
            }
            return Some(ControlMessage::Rule(RuleId::new(ruleset, rule)));
        }
        let name = rest.strip_prefix("param/")?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(ControlMessage::Parameter(name))
    }
}
