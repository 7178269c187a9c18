//! Topic canonicalization and device topic construction
//!
//! Device topics are laid out as `{prefix}/{location}/{device}/{leaf}`. The
//! prefix belongs to the broker slot, so the same device publishes under a
//! different namespace on the primary and reserved brokers. Local naming
//! drops both prefix and location for LAN brokers that serve a single site.

use crate::broker::Slot;
use crate::config::LinkConfig;

/// Collapse repeated slashes and strip leading and trailing ones
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Device topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build a device topic ending in `leaf` for the broker in `slot`
    pub fn device_topic(config: &LinkConfig, slot: Slot, local_naming: bool, leaf: &str) -> String {
        let mut segments: Vec<&str> = Vec::with_capacity(4);

        if !local_naming {
            let prefix = match slot {
                Slot::Primary => config.primary.topic_prefix.as_deref(),
                Slot::Reserved => config
                    .reserved
                    .as_ref()
                    .and_then(|section| section.topic_prefix.as_deref()),
            };
            segments.extend(prefix);
            segments.extend(config.device.location.as_deref());
        }
        segments.push(&config.device.id);
        segments.push(leaf);

        canonicalize_topic(&segments.join("/"))
    }

    /// Topic carrying the online payload and the last-will
    pub fn device_status_topic(config: &LinkConfig, slot: Slot) -> String {
        Self::device_topic(
            config,
            slot,
            config.status.local_naming,
            &config.status.topic,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_has_no_empty_segments(topic in "[a-z/]{0,32}") {
            let result = canonicalize_topic(&topic);
            prop_assert!(!result.contains("//"), "consecutive slashes: {}", result);
            prop_assert!(!result.starts_with('/'), "leading slash: {}", result);
            prop_assert!(!result.ends_with('/'), "trailing slash: {}", result);
        }
    }

    #[test]
    fn test_canonicalize_examples() {
        assert_eq!(canonicalize_topic("//home//lab/dev/"), "home/lab/dev");
        assert_eq!(canonicalize_topic("home/lab"), "home/lab");
        assert_eq!(canonicalize_topic("///"), "");
        assert_eq!(canonicalize_topic(""), "");
    }

    #[test]
    fn test_status_topic_without_prefix() {
        let config = LinkConfig::test_config();
        assert_eq!(
            TopicBuilder::device_status_topic(&config, Slot::Primary),
            "lab/test-device/status"
        );
    }

    #[test]
    fn test_status_topic_uses_slot_prefix() {
        let mut config = LinkConfig::test_config();
        config.primary.topic_prefix = Some("home".to_string());
        config.reserved.as_mut().unwrap().topic_prefix = Some("/cloud/acct-7/".to_string());

        assert_eq!(
            TopicBuilder::device_status_topic(&config, Slot::Primary),
            "home/lab/test-device/status"
        );
        assert_eq!(
            TopicBuilder::device_status_topic(&config, Slot::Reserved),
            "cloud/acct-7/lab/test-device/status"
        );
    }

    #[test]
    fn test_local_naming_drops_prefix_and_location() {
        let mut config = LinkConfig::test_config();
        config.primary.topic_prefix = Some("home".to_string());
        config.status.local_naming = true;

        assert_eq!(
            TopicBuilder::device_status_topic(&config, Slot::Primary),
            "test-device/status"
        );
    }

    #[test]
    fn test_device_topic_without_location() {
        let mut config = LinkConfig::test_config();
        config.device.location = None;
        assert_eq!(
            TopicBuilder::device_topic(&config, Slot::Primary, false, "telemetry"),
            "test-device/telemetry"
        );
    }
}
