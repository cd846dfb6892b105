/// Escalation detection for inbound customer messages. A match means the
/// customer is explicitly asking for a person and the conversation should be
/// handed off with reason `customer_request`.
#[derive(Clone, Debug)]
pub struct HandoffPolicy {
    phrases: Vec<String>,
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        Self::new(
            [
                "human",
                "real person",
                "representative",
                "speak to someone",
                "talk to someone",
                "talk to a person",
                "stop the bot",
                "operator",
            ]
            .into_iter()
            .map(str::to_string),
        )
    }
}

impl HandoffPolicy {
    pub fn new(phrases: impl IntoIterator<Item = String>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|phrase| phrase.trim().to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }

    pub fn detect_escalation(&self, body: &str) -> bool {
        let normalized = body.to_lowercase();
        self.phrases.iter().any(|phrase| normalized.contains(phrase.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::HandoffPolicy;

    #[test]
    fn explicit_help_requests_escalate() {
        let policy = HandoffPolicy::default();
        assert!(policy.detect_escalation("I need a human"));
        assert!(policy.detect_escalation("Can I talk to a REAL PERSON please"));
        assert!(policy.detect_escalation("connect me with a representative"));
    }

    #[test]
    fn ordinary_traffic_does_not_escalate() {
        let policy = HandoffPolicy::default();
        assert!(!policy.detect_escalation("what time is my appointment tomorrow?"));
        assert!(!policy.detect_escalation("thanks, that works"));
    }

    #[test]
    fn custom_phrase_lists_replace_the_defaults() {
        let policy = HandoffPolicy::new(["ayuda".to_string()]);
        assert!(policy.detect_escalation("necesito AYUDA"));
        assert!(!policy.detect_escalation("I need a human"));
    }
}
