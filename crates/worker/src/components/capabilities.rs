use std::collections::HashSet;

use broker_core::config::WorkerConfig;

/// Worker的身份与能力列表
///
/// 能力按匹配优先级排列：设备序列号、主机名、系统属性、Worker名称、
/// 平台标签，最后是配置中额外声明的能力。代理按此顺序尝试领取。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub name: String,
    pub hostname: String,
    pub capabilities: Vec<String>,
}

impl WorkerIdentity {
    pub fn discover(config: &WorkerConfig) -> Self {
        Self::from_parts(config, local_hostname())
    }

    fn from_parts(config: &WorkerConfig, hostname: String) -> Self {
        let name = config.name.clone().unwrap_or_else(|| hostname.clone());
        let platform = config
            .platform
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string());

        let mut candidates = Vec::new();
        candidates.extend(config.device_serial.clone());
        candidates.push(hostname.clone());
        candidates.push(format!(
            "{}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        candidates.push(name.clone());
        candidates.push(platform);
        candidates.extend(config.capabilities.iter().cloned());

        let mut seen = HashSet::new();
        let capabilities = candidates
            .into_iter()
            .map(|cap| cap.trim().to_string())
            .filter(|cap| !cap.is_empty() && seen.insert(cap.clone()))
            .collect();

        Self {
            name,
            hostname,
            capabilities,
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
