//! Canonical embeddable text and stable hashing
//!
//! The embeddable text of a service is the single source of truth for
//! embedding equality: same record bytes ⇒ same text ⇒ same vector. The
//! derivation is fixed — field order, separators, Unicode normalization —
//! so a vector only gets recomputed when the text actually changes.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use kpath_core::ServiceRecord;

/// Build the canonical embeddable text for a service record.
///
/// Line order: `name`, `description`, each capability as
/// `"{name}: {description}"` (description alone when unnamed) in insertion
/// order, then the domains joined with `", "` in insertion order. Lines are
/// NFC-normalized with trailing whitespace stripped; empty lines are
/// dropped.
#[must_use]
pub fn embeddable_text(record: &ServiceRecord) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(2 + record.capabilities.len() + 1);
    lines.push(record.name.clone());
    lines.push(record.description.clone());
    for capability in &record.capabilities {
        match capability.name.as_deref() {
            Some(name) => lines.push(format!("{name}: {}", capability.description)),
            None => lines.push(capability.description.clone()),
        }
    }
    if !record.domains.is_empty() {
        let joined: Vec<&str> = record.domains.iter().map(String::as_str).collect();
        lines.push(joined.join(", "));
    }

    let mut text = lines
        .iter()
        .map(|line| line.nfc().collect::<String>())
        .map(|line| line.trim_end().to_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    text.truncate(text.trim_end().len());
    text
}

/// Stable hash of a normalized query string.
///
/// The query is NFC-normalized and trimmed before hashing, so cosmetically
/// different spellings of the same query share feedback priors.
#[must_use]
pub fn query_hash(query: &str) -> String {
    let normalized: String = query.trim().nfc().collect();
    content_hash(&normalized)
}

/// SHA-256 hex digest of a text, used for change detection.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpath_core::{Capability, ServiceStatus, VisibilityPolicy};

    fn record() -> ServiceRecord {
        ServiceRecord {
            service_id: 1,
            name: "calendar".to_owned(),
            description: "Schedule meetings".to_owned(),
            status: ServiceStatus::Active,
            version: None,
            endpoint: None,
            capabilities: vec![
                Capability::named("create_event", "Create a calendar event"),
                Capability::described("List upcoming events"),
            ],
            domains: ["productivity", "calendar"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            visibility: VisibilityPolicy::Open,
            version_tag: 1,
        }
    }

    #[test]
    fn text_layout_is_fixed() {
        let text = embeddable_text(&record());
        assert_eq!(
            text,
            "calendar\nSchedule meetings\ncreate_event: Create a calendar event\nList upcoming events\nproductivity, calendar"
        );
    }

    #[test]
    fn same_record_same_text() {
        let a = embeddable_text(&record());
        let b = embeddable_text(&record());
        assert_eq!(a, b);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn description_change_changes_text() {
        let mut changed = record();
        changed.description = "Plan meetings".to_owned();
        assert_ne!(embeddable_text(&record()), embeddable_text(&changed));
    }

    #[test]
    fn version_tag_does_not_affect_text() {
        let mut bumped = record();
        bumped.version_tag = 99;
        assert_eq!(embeddable_text(&record()), embeddable_text(&bumped));
    }

    #[test]
    fn no_domains_no_trailing_line() {
        let mut bare = record();
        bare.domains.clear();
        bare.capabilities.clear();
        assert_eq!(embeddable_text(&bare), "calendar\nSchedule meetings");
    }

    #[test]
    fn trailing_whitespace_stripped() {
        let mut padded = record();
        padded.description = "Schedule meetings   ".to_owned();
        assert_eq!(embeddable_text(&padded), embeddable_text(&record()));
    }

    #[test]
    fn unicode_nfc_normalization() {
        // "é" precomposed (U+00E9) vs decomposed (e + U+0301)
        let mut precomposed = record();
        precomposed.description = "caf\u{00e9}".to_owned();
        let mut decomposed = record();
        decomposed.description = "cafe\u{0301}".to_owned();
        assert_eq!(
            embeddable_text(&precomposed),
            embeddable_text(&decomposed)
        );
    }

    #[test]
    fn query_hash_is_stable_and_normalized() {
        let a = query_hash("  schedule a meeting ");
        let b = query_hash("schedule a meeting");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = query_hash("book travel");
        assert_ne!(a, c);
    }

    #[test]
    fn query_hash_nfc() {
        assert_eq!(query_hash("caf\u{00e9}"), query_hash("cafe\u{0301}"));
    }

    #[test]
    fn content_hash_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
