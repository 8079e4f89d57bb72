//! Polling-loop filter registrations.

use std::collections::BTreeMap;

use hce_types::{HandlerInfo, HandlerRef};
use regex::Regex;
use tracing::warn;

/// A handler whose filter matched a polling frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingFilterMatch {
    pub handler: HandlerRef,
    pub on_host: bool,
    pub auto_transact: bool,
}

#[derive(Debug, Clone)]
struct PatternFilter {
    regex: Regex,
    matches: Vec<PollingFilterMatch>,
}

/// Exact-hex and regular-expression filters of the visible handlers.
#[derive(Debug, Clone, Default)]
pub struct PollingFilterIndex {
    exact: BTreeMap<String, Vec<PollingFilterMatch>>,
    patterns: BTreeMap<String, PatternFilter>,
}

impl PollingFilterIndex {
    pub fn build<'a, I>(handlers: I) -> Self
    where
        I: IntoIterator<Item = &'a HandlerInfo>,
    {
        let mut index = Self::default();
        for info in handlers {
            for filter in &info.polling_filters {
                let found = PollingFilterMatch {
                    handler: info.handler_ref(),
                    on_host: info.is_on_host(),
                    auto_transact: filter.auto_transact,
                };
                let key = filter.pattern.to_ascii_uppercase();
                if !filter.regex {
                    index.exact.entry(key).or_default().push(found);
                    continue;
                }
                if let Some(existing) = index.patterns.get_mut(&filter.pattern) {
                    existing.matches.push(found);
                    continue;
                }
                match Regex::new(&format!("^(?:{})$", filter.pattern)) {
                    Ok(regex) => {
                        index.patterns.insert(
                            filter.pattern.clone(),
                            PatternFilter {
                                regex,
                                matches: vec![found],
                            },
                        );
                    }
                    Err(e) => {
                        warn!(
                            handler = %info.handler_ref(),
                            pattern = %filter.pattern,
                            error = %e,
                            "Ignoring invalid polling loop pattern"
                        );
                    }
                }
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    /// Every registration matching the uppercase hex form of a frame.
    pub fn matches(&self, frame_hex: &str) -> Vec<PollingFilterMatch> {
        let key = frame_hex.to_ascii_uppercase();
        let mut out: Vec<PollingFilterMatch> = self.exact.get(&key).cloned().unwrap_or_default();
        for pattern in self.patterns.values() {
            if pattern.regex.is_match(&key) {
                for found in &pattern.matches {
                    if !out.iter().any(|m| m.handler == found.handler) {
                        out.push(found.clone());
                    }
                }
            }
        }
        out
    }
}
