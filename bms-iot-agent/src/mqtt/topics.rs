//! Topic surface shared with the cloud. Everything hangs off the
//! `iot/global/{organization}/{site}/{device}/` prefix.

pub fn topic_prefix(organization_id: &str, site_id: &str, device_id: &str) -> String {
    format!("iot/global/{organization_id}/{site_id}/{device_id}/")
}

/// Wildcard filter covering every command request leaf.
pub fn command_request_filter(prefix: &str) -> String {
    format!("{prefix}command/+/request")
}

pub fn command_response_topic(prefix: &str, command: &str) -> String {
    format!("{prefix}command/{command}/response")
}

pub fn heartbeat_topic(prefix: &str) -> String {
    format!("{prefix}status/heartbeat")
}

pub fn data_bulk_topic(prefix: &str) -> String {
    format!("{prefix}data/bulk")
}

/// Extracts the command leaf from `…/command/<name>/request`.
pub fn command_name(topic: &str) -> Option<&str> {
    let mut segments = topic.split('/').rev();
    let request = segments.next()?;
    let name = segments.next()?;
    let command = segments.next()?;
    (request == "request" && command == "command").then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_carries_the_identity_triple() {
        let prefix = topic_prefix("org_1", "site-2", "dev-3");
        assert_eq!(prefix, "iot/global/org_1/site-2/dev-3/");
        assert_eq!(
            command_request_filter(&prefix),
            "iot/global/org_1/site-2/dev-3/command/+/request"
        );
        assert_eq!(
            heartbeat_topic(&prefix),
            "iot/global/org_1/site-2/dev-3/status/heartbeat"
        );
        assert_eq!(
            data_bulk_topic(&prefix),
            "iot/global/org_1/site-2/dev-3/data/bulk"
        );
    }

    #[test]
    fn command_name_extraction() {
        assert_eq!(
            command_name("iot/global/o/s/d/command/config_upload/request"),
            Some("config_upload")
        );
        assert_eq!(
            command_name("iot/global/o/s/d/command/set_value_to_point/request"),
            Some("set_value_to_point")
        );
        assert_eq!(command_name("iot/global/o/s/d/status/heartbeat"), None);
        assert_eq!(command_name("command/request"), None);
    }
}
