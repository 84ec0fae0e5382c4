use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod transport;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};

/// 单次渠道请求的固定超时
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// 保留的扩展字段键
pub const SESSION_ID_KEY: &str = "session_id";
pub const PROJECT_NAME_KEY: &str = "project_name";
pub const DEFAULT_SESSION_ID: &str = "unknown";
pub const DEFAULT_PROJECT_NAME: &str = "Unknown";

/// 底层 HTTP 传输错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Request(String),
}

/// 单个渠道的发送错误，只影响该渠道的结果
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Error: {0}")]
    Transport(#[from] TransportError),

    #[error("Error: cannot encode payload: {0}")]
    Payload(String),
}

/// 获取访问令牌失败，整个运行中止
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("cannot read credentials file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("malformed service account key: {0}")]
    MalformedKey(String),

    #[error("failed to sign token assertion: {0}")]
    Signing(String),

    #[error("token exchange failed: {0}")]
    Exchange(#[from] TransportError),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// 配置错误，在任何网络请求之前中止
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Credentials file not found: {}", .0.display())]
    MissingCredentialsFile(PathBuf),

    #[error("Firebase project id is required (--project-id or CC_PROJECT_ID)")]
    MissingProjectId,

    #[error("{flag} is required for {mode} mode")]
    MissingAddress { flag: &'static str, mode: DeliveryMode },
}

impl ConfigurationError {
    /// 给操作者的补救提示
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            ConfigurationError::MissingCredentialsFile(_) => Some(
                "Please download from Firebase Console:\n  Project Settings → Service Accounts → Generate New Private Key",
            ),
            _ => None,
        }
    }
}

/// 分发过程中的致命错误
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Push,
    Document,
}

impl Channel {
    /// 操作者输出中的渠道标签
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Push => "FCM",
            Channel::Document => "Firestore",
        }
    }
}

/// 推送模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeliveryMode {
    #[serde(rename = "fcm", alias = "push")]
    Push,
    #[serde(rename = "firestore", alias = "document")]
    Document,
    #[serde(rename = "both")]
    Both,
}

impl DeliveryMode {
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            DeliveryMode::Push => &[Channel::Push],
            DeliveryMode::Document => &[Channel::Document],
            DeliveryMode::Both => &[Channel::Push, Channel::Document],
        }
    }
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Both
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryMode::Push => "fcm",
            DeliveryMode::Document => "firestore",
            DeliveryMode::Both => "both",
        })
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fcm" | "push" => Ok(DeliveryMode::Push),
            "firestore" | "document" => Ok(DeliveryMode::Document),
            "both" => Ok(DeliveryMode::Both),
            other => Err(format!(
                "unknown mode '{other}' (expected fcm, firestore or both)"
            )),
        }
    }
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Progress,
    Complete,
    Error,
    Warning,
    Code,
    Markdown,
    Interactive,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Progress => "progress",
            MessageKind::Complete => "complete",
            MessageKind::Error => "error",
            MessageKind::Warning => "warning",
            MessageKind::Code => "code",
            MessageKind::Markdown => "markdown",
            MessageKind::Interactive => "interactive",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "progress" => Ok(MessageKind::Progress),
            "complete" => Ok(MessageKind::Complete),
            "error" => Ok(MessageKind::Error),
            "warning" => Ok(MessageKind::Warning),
            "code" => Ok(MessageKind::Code),
            "markdown" => Ok(MessageKind::Markdown),
            "interactive" => Ok(MessageKind::Interactive),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

/// 扩展字段的值，保留原始类型
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl ExtraValue {
    /// 按字面推断类型：布尔、整数、浮点，其余为文本
    pub fn infer(raw: &str) -> Self {
        match raw {
            "true" => return ExtraValue::Boolean(true),
            "false" => return ExtraValue::Boolean(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ExtraValue::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => ExtraValue::Float(f),
            _ => ExtraValue::Text(raw.to_string()),
        }
    }
}

/// 推送数据只接受字符串，这里给出统一的文本形式
impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Text(s) => f.write_str(s),
            ExtraValue::Integer(i) => write!(f, "{i}"),
            // 整数值的浮点数保留小数部分，避免与整数混淆
            ExtraValue::Float(v) => write!(f, "{v:?}"),
            ExtraValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ExtraValue {
    fn from(value: &str) -> Self {
        ExtraValue::Text(value.to_string())
    }
}

impl From<String> for ExtraValue {
    fn from(value: String) -> Self {
        ExtraValue::Text(value)
    }
}

impl From<i64> for ExtraValue {
    fn from(value: i64) -> Self {
        ExtraValue::Integer(value)
    }
}

impl From<f64> for ExtraValue {
    fn from(value: f64) -> Self {
        ExtraValue::Float(value)
    }
}

impl From<bool> for ExtraValue {
    fn from(value: bool) -> Self {
        ExtraValue::Boolean(value)
    }
}

/// 按插入顺序保存的扩展字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extras {
    entries: Vec<(String, ExtraValue)>,
}

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入字段；键已存在时原位替换
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ExtraValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtraValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 判断扩展字段键是否为保留键（会话 ID / 项目名）
pub fn is_reserved_key(key: &str) -> bool {
    matches!(key, SESSION_ID_KEY | PROJECT_NAME_KEY | "sessionId" | "projectName")
}

/// 一次通知事件
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub message_type: MessageKind,
    pub title: String,
    pub body: String,
    pub extras: Extras,
}

impl EventRequest {
    pub fn new(message_type: MessageKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_type,
            title: title.into(),
            body: body.into(),
            extras: Extras::new(),
        }
    }

    /// 添加扩展字段
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> Self {
        self.extras.insert(key, value);
        self
    }

    pub fn session_id(&self) -> String {
        self.reserved(SESSION_ID_KEY, "sessionId", DEFAULT_SESSION_ID)
    }

    pub fn project_name(&self) -> String {
        self.reserved(PROJECT_NAME_KEY, "projectName", DEFAULT_PROJECT_NAME)
    }

    fn reserved(&self, key: &str, alias: &str, default: &str) -> String {
        self.extras
            .get(key)
            .or_else(|| self.extras.get(alias))
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_string())
    }
}

/// 各渠道的目标地址
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addressing {
    pub push_token: Option<String>,
    pub device_id: Option<String>,
}

impl Addressing {
    /// 渠道所需的地址；空字符串视为缺失
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Push => self.push_token.as_deref(),
            Channel::Document => self.device_id.as_deref(),
        };
        address.map(str::trim).filter(|a| !a.is_empty())
    }

    /// 缺失地址时提示的命令行参数
    pub fn flag_for(channel: Channel) -> &'static str {
        match channel {
            Channel::Push => "--token",
            Channel::Document => "--device-id",
        }
    }
}

/// 短期有效的 Bearer 令牌，仅在一次运行内使用
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// 渠道结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Sent,
    Skipped,
    Failed,
}

/// 单个渠道的发送结果
#[derive(Debug, Clone)]
pub struct Outcome {
    pub channel: Channel,
    pub status: OutcomeStatus,
    /// 成功时为消息/文档 ID，否则为原因
    pub detail: String,
}

impl Outcome {
    fn new(channel: Channel, status: OutcomeStatus, detail: impl Into<String>) -> Self {
        Self {
            channel,
            status,
            detail: detail.into(),
        }
    }

    pub fn sent(channel: Channel, detail: impl Into<String>) -> Self {
        Self::new(channel, OutcomeStatus::Sent, detail)
    }

    pub fn skipped(channel: Channel, detail: impl Into<String>) -> Self {
        Self::new(channel, OutcomeStatus::Skipped, detail)
    }

    pub fn failed(channel: Channel, error: &ChannelError) -> Self {
        Self::new(channel, OutcomeStatus::Failed, error.to_string())
    }

    pub fn is_sent(&self) -> bool {
        self.status == OutcomeStatus::Sent
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.channel.label();
        match (self.status, self.channel) {
            (OutcomeStatus::Sent, Channel::Push) => {
                write!(f, "[{label}] ✓ Message sent: {}", self.detail)
            }
            (OutcomeStatus::Sent, Channel::Document) => {
                write!(f, "[{label}] ✓ Document created: {}", self.detail)
            }
            (OutcomeStatus::Skipped, _) => write!(f, "[{label}] Skipped: {}", self.detail),
            (OutcomeStatus::Failed, _) => write!(f, "[{label}] ✗ {}", self.detail),
        }
    }
}

/// 凭据提供者：用服务账号换取访问令牌
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn obtain_token(
        &self,
        credentials_file: &Path,
        scopes: &[&str],
    ) -> Result<AccessToken, CredentialError>;
}

/// 渠道发送器
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 该发送器负责的渠道
    fn channel(&self) -> Channel;

    /// 构建载荷并发送一次，不重试
    async fn send(
        &self,
        token: &AccessToken,
        project_id: &str,
        address: &str,
        event: &EventRequest,
    ) -> Result<Outcome, ChannelError>;
}

/// 渠道注册表
pub struct ChannelRegistry {
    senders: HashMap<Channel, Box<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// 注册发送器，同一渠道后注册的覆盖先注册的
    pub fn register(&mut self, sender: Box<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn get(&self, channel: Channel) -> Option<&dyn ChannelSender> {
        self.senders.get(&channel).map(|s| s.as_ref())
    }

    pub fn list_channels(&self) -> Vec<Channel> {
        self.senders.keys().copied().collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
