const COMMAND_PREFIX: &str = "cmnd/";
const COMMAND_SUFFIX: &str = "/Power";
const STATUS_PREFIX: &str = "stat/";
const STATUS_SUFFIX: &str = "/POWER";

/// Every relay's power command topic.
pub const TOPIC_CMD_POWER_ALL: &str = "cmnd/+/Power";

pub fn command_topic(device: &str) -> String {
    format!("{COMMAND_PREFIX}{device}{COMMAND_SUFFIX}")
}

pub fn status_topic(device: &str) -> String {
    format!("{STATUS_PREFIX}{device}{STATUS_SUFFIX}")
}

pub fn device_from_command_topic(topic: &str) -> Option<&str> {
    strip_device(topic, COMMAND_PREFIX, COMMAND_SUFFIX)
}

pub fn device_from_status_topic(topic: &str) -> Option<&str> {
    strip_device(topic, STATUS_PREFIX, STATUS_SUFFIX)
}

fn strip_device<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let device = topic.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if device.is_empty() || device.contains('/') {
        None
    } else {
        Some(device)
    }
}
