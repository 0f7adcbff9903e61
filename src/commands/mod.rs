mod config_cmd;
mod conflict;
mod device;
mod dispatch;
mod entity;
mod queue;
mod remote;
mod tombstone;

pub use config_cmd::ConfigCommand;
pub use conflict::ConflictCommand;
pub use device::DeviceCommand;
pub use dispatch::DispatchCommand;
pub use entity::EntityCommand;
pub use queue::QueueCommand;
pub use remote::RemoteCommand;
pub use tombstone::TombstoneCommand;

use clap::ValueEnum;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a `--data` argument, which must be a JSON object.
fn parse_data(raw: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON data: {}", e))?;
    if !value.is_object() {
        return Err("Entity data must be a JSON object".into());
    }
    Ok(value)
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let cut: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_requires_object() {
        assert!(parse_data(r#"{"name": "Jane"}"#).is_ok());
        assert!(parse_data("[1, 2]").is_err());
        assert!(parse_data("not json").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer value", 10), "a much ...");
    }
}
