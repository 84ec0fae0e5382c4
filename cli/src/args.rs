use crate::config::Overrides;
use clap::Parser;
use common::{Addressing, DeliveryMode, EventRequest, ExtraValue, MessageKind};
use std::path::PathBuf;

const AFTER_HELP: &str = "\
Message types (--type):
  progress    work in progress
  complete    task finished successfully
  error       task failed
  warning     warning
  code        code snippet
  markdown    markdown content
  interactive needs a response from the user

Examples:
  cc_push --mode firestore --device-id abc123 --type complete \\
      --title \"构建完成\" --message \"项目构建成功，耗时 30 秒\"

  cc_push --mode fcm --token <TOKEN> --type progress -m \"正在编译 50%...\"

  cc_push --mode both --token <TOKEN> --device-id abc123 --extra exitCode=0 -m \"任务完成\"";

/// 命令行参数，环境变量由 clap 合并
#[derive(Debug, Parser)]
#[command(
    name = "cc_push",
    version,
    about = "通过 FCM 和 Firestore 发送 CC Monitor 通知",
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// 推送模式：fcm、firestore 或 both（默认 both）
    #[arg(long, env = "CC_PUSH_MODE")]
    pub mode: Option<DeliveryMode>,

    /// FCM 设备 Token
    #[arg(long, env = "CC_FCM_TOKEN")]
    pub token: Option<String>,

    /// 设备 ID（Firestore）
    #[arg(long, env = "CC_DEVICE_ID")]
    pub device_id: Option<String>,

    /// 消息类型
    #[arg(long = "type", default_value = "progress")]
    pub kind: MessageKind,

    /// 消息标题
    #[arg(long, default_value = "CC Monitor")]
    pub title: String,

    /// 消息内容
    #[arg(short, long)]
    pub message: String,

    /// 会话 ID
    #[arg(long)]
    pub session_id: Option<String>,

    /// 项目名称
    #[arg(long)]
    pub project_name: Option<String>,

    /// 项目路径
    #[arg(long)]
    pub project_path: Option<String>,

    /// Hook 事件类型
    #[arg(long)]
    pub hook_event: Option<String>,

    /// 工具名称
    #[arg(long)]
    pub tool_name: Option<String>,

    /// 额外字段 KEY=VALUE；true/false、整数和浮点数保留类型
    #[arg(long = "extra", value_name = "KEY=VALUE", value_parser = parse_extra)]
    pub extras: Vec<(String, ExtraValue)>,

    /// Firebase 凭据文件路径
    #[arg(long = "credentials", env = "CC_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Firebase 项目 ID
    #[arg(long, env = "CC_PROJECT_ID")]
    pub project_id: Option<String>,

    /// 配置文件（默认 ~/.config/cc_monitor/config.json）
    #[arg(long, env = "CC_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "CC_FCM_ENDPOINT", hide = true)]
    pub fcm_endpoint: Option<String>,

    #[arg(long, env = "CC_FIRESTORE_ENDPOINT", hide = true)]
    pub firestore_endpoint: Option<String>,

    /// 输出诊断日志
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_extra(raw: &str) -> Result<(String, ExtraValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), ExtraValue::infer(value)))
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            project_id: self.project_id.clone(),
            credentials_file: self.credentials_file.clone(),
            mode: self.mode,
        }
    }

    pub fn addressing(&self) -> Addressing {
        Addressing {
            push_token: self.token.clone(),
            device_id: self.device_id.clone(),
        }
    }

    pub fn event(&self) -> EventRequest {
        let mut event = EventRequest::new(self.kind, self.title.clone(), self.message.clone());
        let named = [
            (common::SESSION_ID_KEY, &self.session_id),
            (common::PROJECT_NAME_KEY, &self.project_name),
            ("projectPath", &self.project_path),
            ("hookEvent", &self.hook_event),
            ("toolName", &self.tool_name),
        ];
        for (key, value) in named {
            if let Some(value) = value {
                event.extras.insert(key, value.as_str());
            }
        }
        for (key, value) in &self.extras {
            event.extras.insert(key.clone(), value.clone());
        }
        event
    }
}
