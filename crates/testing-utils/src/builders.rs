//! Test data builders with sensible defaults

use broker_core::models::{PackageRef, TaskConfig};

/// Builder for [`TaskConfig`]
#[derive(Debug, Clone, Default)]
pub struct TaskConfigBuilder {
    config: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requires(mut self, capability: &str) -> Self {
        self.config
            .executor_requirements
            .push(capability.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.config.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_webhook(mut self, url: &str) -> Self {
        self.config.webhook = Some(url.to_string());
        self
    }

    pub fn with_package(mut self, name: &str, version: &str) -> Self {
        self.config.packages.push(PackageRef {
            name: name.to_string(),
            version: version.to_string(),
        });
        self
    }

    /// Sets an opaque key in the flattened configuration map
    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.extra.insert(key.to_string(), value);
        self
    }

    /// Shorthand for the `command` key the worker agent executes
    pub fn with_command(self, program: &str, args: &[&str]) -> Self {
        let mut command = vec![serde_json::Value::String(program.to_string())];
        command.extend(args.iter().map(|a| serde_json::Value::String(a.to_string())));
        self.with_extra("command", serde_json::Value::Array(command))
    }

    pub fn build(self) -> TaskConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_command_sets_extra() {
        let config = TaskConfigBuilder::new()
            .with_command("echo", &["hi"])
            .build();
        assert_eq!(config.extra["command"], serde_json::json!(["echo", "hi"]));
    }
}
