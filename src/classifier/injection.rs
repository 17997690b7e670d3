//! Prompt-injection signature detection.
//!
//! Runs independently of categorisation. The same signatures are reused by
//! the threat registry to match new actions against cached injection threats.

use super::rules::Matcher;

/// Fixed phrase signatures: instruction overrides, role reassignment and
/// system-prompt manipulation.
const SIGNATURES: &[(&str, &str)] = &[
    (
        "injection:ignore_previous",
        r"ignore\s+(all\s+)?(the\s+)?(previous|prior)\s+instructions",
    ),
    ("injection:disregard_previous", r"disregard\s+(all\s+)?(previous|prior)"),
    ("injection:forget_previous", r"forget\s+(all\s+)?(previous|prior)"),
    ("injection:new_instructions", r"new\s+instructions\s*:"),
    ("injection:system_prompt", r"system\s+prompt\s*:"),
    ("injection:role_reassignment", r"you\s+are\s+now\b"),
    ("injection:from_now_on", r"from\s+now\s+on\s+you\s+(are|will)\b"),
    (
        "injection:reveal_system_prompt",
        r"(reveal|print|show|repeat)\s+(your|the)\s+system\s+prompt",
    ),
];

/// Matches injection signatures against normalised action text.
#[derive(Debug, Clone)]
pub struct InjectionDetector {
    signatures: Vec<Matcher>,
}

impl Default for InjectionDetector {
    fn default() -> Self {
        let signatures = SIGNATURES
            .iter()
            .filter_map(|(label, pattern)| Matcher::regex(*label, pattern).ok())
            .collect();
        Self { signatures }
    }
}

impl InjectionDetector {
    /// Detector over a caller-supplied signature set.
    pub fn new(signatures: Vec<Matcher>) -> Self {
        Self { signatures }
    }

    /// Labels of every signature that fires, in signature order.
    pub fn detect(&self, text: &str) -> Vec<String> {
        self.signatures
            .iter()
            .filter(|s| s.is_match(text))
            .map(|s| s.label().to_owned())
            .collect()
    }

    /// Whether any signature fires.
    pub fn is_injection(&self, text: &str) -> bool {
        self.signatures.iter().any(|s| s.is_match(text))
    }
}
