use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use common::{
    AccessToken, Channel, ChannelError, ChannelSender, EventRequest, ExtraValue, HttpRequest,
    HttpTransport, Outcome, is_reserved_key,
};
use log::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1/projects";

/// Firestore 文档写入器，消息写入 `devices/{device_id}/messages`
pub struct DocumentSender {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
}

impl DocumentSender {
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

    pub fn collection_url(&self, project_id: &str, device_id: &str) -> String {
        format!(
            "{}/{}/databases/(default)/documents/devices/{}/messages",
            self.endpoint, project_id, device_id
        )
    }
}

#[async_trait]
impl ChannelSender for DocumentSender {
    fn channel(&self) -> Channel {
        Channel::Document
    }

    async fn send(
        &self,
        token: &AccessToken,
        project_id: &str,
        address: &str,
        event: &EventRequest,
    ) -> Result<Outcome, ChannelError> {
        let (document_id, envelope) = build_document_payload(event);
        let body =
            serde_json::to_value(&envelope).map_err(|e| ChannelError::Payload(e.to_string()))?;

        let request = HttpRequest::json(self.collection_url(project_id, address), body)
            .bearer(token.secret())
            .query("documentId", document_id.as_str());
        let response = self.transport.post(request).await?;

        match response.status {
            200 | 201 => {
                info!("Firestore document {document_id} created for device {address}");
                Ok(Outcome::sent(Channel::Document, document_id))
            }
            status => {
                warn!("Firestore rejected document: {status}");
                Err(ChannelError::Rejected {
                    status,
                    body: response.body,
                })
            }
        }
    }
}

/// 构建 Firestore 文档，返回新生成的文档 ID
///
/// 与推送载荷不同，扩展字段保留原始类型，并覆盖同名的内置字段。
/// 每次调用生成新的 ID，相同事件会写成两个文档。
pub fn build_document_payload(event: &EventRequest) -> (String, DocumentEnvelope) {
    let mut fields = BTreeMap::new();
    fields.insert(
        "type".to_string(),
        FieldValue::StringValue(event.message_type.as_str().to_string()),
    );
    fields.insert("title".to_string(), FieldValue::StringValue(event.title.clone()));
    fields.insert("message".to_string(), FieldValue::StringValue(event.body.clone()));
    fields.insert(
        "createdAt".to_string(),
        FieldValue::TimestampValue(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    fields.insert("sessionId".to_string(), FieldValue::StringValue(event.session_id()));
    fields.insert("projectName".to_string(), FieldValue::StringValue(event.project_name()));

    for (key, value) in event.extras.iter() {
        if !is_reserved_key(key) {
            fields.insert(key.to_string(), FieldValue::from(value));
        }
    }

    (Uuid::new_v4().to_string(), DocumentEnvelope { fields })
}

// --- Firestore REST Payload Structs ---

#[derive(Debug, Clone, Serialize)]
pub struct DocumentEnvelope {
    pub fields: BTreeMap<String, FieldValue>,
}

/// Firestore 类型化字段值，序列化为 `{"<type>Value": v}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    StringValue(String),
    /// Firestore REST 以十进制字符串传输 int64
    IntegerValue(String),
    DoubleValue(f64),
    BooleanValue(bool),
    TimestampValue(String),
}

impl From<&ExtraValue> for FieldValue {
    fn from(value: &ExtraValue) -> Self {
        match value {
            ExtraValue::Text(s) => FieldValue::StringValue(s.clone()),
            ExtraValue::Integer(i) => FieldValue::IntegerValue(i.to_string()),
            ExtraValue::Float(f) => FieldValue::DoubleValue(*f),
            ExtraValue::Boolean(b) => FieldValue::BooleanValue(*b),
        }
    }
}
