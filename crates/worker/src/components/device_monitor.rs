use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// 检查绑定的物理设备是否在线
///
/// 未配置序列号或探测命令时始终视为在线。探测命令中的 `{serial}`
/// 会被替换为设备序列号，退出码非零表示设备断开。
#[derive(Debug, Clone, Default)]
pub struct DeviceMonitor {
    serial: Option<String>,
    probe: Vec<String>,
}

impl DeviceMonitor {
    pub fn new(serial: Option<String>, probe: Vec<String>) -> Self {
        Self { serial, probe }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn probe_command(&self) -> Option<Vec<String>> {
        let serial = self.serial.as_deref()?;
        if self.probe.is_empty() {
            return None;
        }
        Some(
            self.probe
                .iter()
                .map(|arg| arg.replace("{serial}", serial))
                .collect(),
        )
    }

    pub async fn is_connected(&self) -> bool {
        let Some(command) = self.probe_command() else {
            return true;
        };

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => {
                debug!(serial = ?self.serial, "设备探测退出码: {:?}", status.code());
                status.success()
            }
            Ok(Err(e)) => {
                warn!("设备探测命令启动失败: {}", e);
                false
            }
            Err(_) => {
                warn!("设备探测超时");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_substitutes_serial() {
        let monitor = DeviceMonitor::new(
            Some("R58M".to_string()),
            vec!["adb".into(), "-s".into(), "{serial}".into(), "get-state".into()],
        );
        assert_eq!(
            monitor.probe_command().unwrap(),
            vec!["adb", "-s", "R58M", "get-state"]
        );
    }

    #[tokio::test]
    async fn test_unbound_worker_is_always_connected() {
        assert!(DeviceMonitor::default().is_connected().await);
        let no_probe = DeviceMonitor::new(Some("R58M".to_string()), Vec::new());
        assert!(no_probe.is_connected().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_exit_code_decides_connectivity() {
        let online = DeviceMonitor::new(Some("S1".into()), vec!["true".into()]);
        assert!(online.is_connected().await);

        let offline = DeviceMonitor::new(Some("S1".into()), vec!["false".into()]);
        assert!(!offline.is_connected().await);

        let missing = DeviceMonitor::new(
            Some("S1".into()),
            vec!["definitely-not-a-real-probe-binary".into()],
        );
        assert!(!missing.is_connected().await);
    }
}
