use async_trait::async_trait;
use chrono::Utc;
use common::{
    AccessToken, Channel, ChannelError, ChannelSender, EventRequest, HttpRequest, HttpTransport,
    Outcome,
};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";

const NOTIFICATION_CHANNEL_ID: &str = "cc_monitor_channel";
const ACCENT_COLOR: &str = "#6366F1";
const DEFAULT_SOUND: &str = "default";

/// FCM 推送发送器
pub struct PushSender {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
}

impl PushSender {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, transport)
    }

    /// 指定接口前缀（例如模拟器）
    pub fn with_endpoint(endpoint: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn send_url(&self, project_id: &str) -> String {
        format!("{}/{}/messages:send", self.endpoint, project_id)
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(
        &self,
        token: &AccessToken,
        project_id: &str,
        address: &str,
        event: &EventRequest,
    ) -> Result<Outcome, ChannelError> {
        let envelope = build_push_payload(address, event);
        let body =
            serde_json::to_value(&envelope).map_err(|e| ChannelError::Payload(e.to_string()))?;

        let request = HttpRequest::json(self.send_url(project_id), body).bearer(token.secret());
        let response = self.transport.post(request).await?;

        if response.status != 200 {
            warn!("FCM rejected message: {}", response.status);
            return Err(ChannelError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let name = serde_json::from_str::<FcmApiResponse>(&response.body)
            .ok()
            .and_then(|r| r.name)
            .unwrap_or_else(|| "N/A".to_string());
        info!("FCM accepted message {name}");
        Ok(Outcome::sent(Channel::Push, name))
    }
}

/// 构建 FCM HTTP v1 消息
///
/// 推送数据只允许字符串，扩展字段统一转成文本，并覆盖同名的内置字段。
pub fn build_push_payload(device_token: &str, event: &EventRequest) -> PushEnvelope {
    let mut data = BTreeMap::new();
    data.insert("type".to_string(), event.message_type.as_str().to_string());
    data.insert("title".to_string(), event.title.clone());
    data.insert("message".to_string(), event.body.clone());
    data.insert(
        "timestamp".to_string(),
        Utc::now().timestamp_millis().to_string(),
    );
    for (key, value) in event.extras.iter() {
        data.insert(key.to_string(), value.to_string());
    }

    PushEnvelope {
        message: FcmMessageContent {
            token: device_token.to_string(),
            notification: FcmNotification {
                title: event.title.clone(),
                body: event.body.clone(),
            },
            data,
            android: AndroidConfig {
                priority: "high".to_string(),
                notification: AndroidNotification {
                    channel_id: NOTIFICATION_CHANNEL_ID.to_string(),
                    sound: DEFAULT_SOUND.to_string(),
                    color: ACCENT_COLOR.to_string(),
                },
            },
            apns: ApnsConfig {
                payload: ApnsPayload {
                    aps: Aps {
                        sound: DEFAULT_SOUND.to_string(),
                        badge: 1,
                    },
                },
            },
        },
    }
}

// --- FCM API Payload Structs ---

#[derive(Debug, Clone, Serialize)]
pub struct PushEnvelope {
    pub message: FcmMessageContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmMessageContent {
    pub token: String,
    pub notification: FcmNotification,
    pub data: BTreeMap<String, String>,
    pub android: AndroidConfig,
    pub apns: ApnsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidConfig {
    pub priority: String,
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidNotification {
    pub channel_id: String,
    pub sound: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsConfig {
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aps {
    pub sound: String,
    pub badge: u32,
}

#[derive(Deserialize)]
struct FcmApiResponse {
    name: Option<String>,
}
