use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use broker_core::models::TaskConfig;
use serde_json::Value;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

/// 一次本地执行的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// 任务执行器
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        config: &TaskConfig,
        work_dir: &Path,
        timeout: Duration,
    ) -> WorkerResult<ExecutionOutcome>;
}

/// 从任务配置中解析出的命令
///
/// `command` 可以是字符串数组（直接执行）或单个字符串（交给 `sh -c`），
/// `env` 为可选的字符串键值对。
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl TaskCommand {
    pub fn from_config(config: &TaskConfig) -> WorkerResult<Self> {
        let (program, args) = match config.extra.get("command") {
            Some(Value::String(line)) if !line.trim().is_empty() => {
                ("sh".to_string(), vec!["-c".to_string(), line.clone()])
            }
            Some(Value::Array(items)) => {
                let mut parts = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| WorkerError::Execution("command只能包含字符串".into()))
                    })
                    .collect::<WorkerResult<Vec<_>>>()?
                    .into_iter();
                let program = parts
                    .next()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| WorkerError::Execution("command不能为空".into()))?;
                (program, parts.collect())
            }
            _ => return Err(WorkerError::Execution("任务配置缺少command".into())),
        };

        let env = match config.extra.get("env") {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect(),
            Some(_) => return Err(WorkerError::Execution("env必须是对象".into())),
        };

        Ok(Self { program, args, env })
    }
}

/// 在临时目录中执行任务命令，超时后杀掉子进程
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        config: &TaskConfig,
        work_dir: &Path,
        timeout: Duration,
    ) -> WorkerResult<ExecutionOutcome> {
        let command = TaskCommand::from_config(config)?;
        info!(
            "执行命令: {} {:?}, 超时 {:?}",
            command.program, command.args, timeout
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .env("BROKER_WORK_DIR", work_dir)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| WorkerError::Execution(format!("启动命令失败: {e}")))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let outcome = ExecutionOutcome {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    elapsed: started.elapsed(),
                    timed_out: false,
                };
                info!(
                    "命令执行完成: exit_code={}, 耗时 {}ms",
                    outcome.exit_code,
                    outcome.elapsed.as_millis()
                );
                Ok(outcome)
            }
            Err(_) => {
                warn!("命令执行超时（{:?}），已终止", timeout);
                Ok(ExecutionOutcome {
                    exit_code: -1,
                    stderr: format!("命令执行超时（{}秒）", timeout.as_secs()).into_bytes(),
                    elapsed: started.elapsed(),
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}
