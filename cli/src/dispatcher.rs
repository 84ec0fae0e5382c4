use crate::config::Configuration;
use common::{
    AccessToken, Addressing, Channel, ChannelRegistry, ConfigurationError, CredentialProvider,
    DispatchError, EventRequest, Outcome, OutcomeStatus,
};
use google_auth::SCOPES;
use log::*;
use std::sync::Arc;

/// 一次分发的全部渠道结果
#[derive(Debug, Clone)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    /// 任一渠道发送成功即视为送达
    pub fn delivered(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_sent)
    }

    pub fn exit_status(&self) -> u8 {
        if self.delivered() { 0 } else { 1 }
    }

    pub fn outcome(&self, channel: Channel) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }
}

/// 双渠道分发器：认证一次，按模式发送，汇总结果
pub struct Dispatcher {
    credentials: Arc<dyn CredentialProvider>,
    registry: ChannelRegistry,
}

impl Dispatcher {
    pub fn new(credentials: Arc<dyn CredentialProvider>, registry: ChannelRegistry) -> Self {
        Self {
            credentials,
            registry,
        }
    }

    pub async fn run(
        &self,
        config: &Configuration,
        addressing: &Addressing,
        event: &EventRequest,
    ) -> Result<Report, DispatchError> {
        config.validate()?;

        // 单渠道模式下缺少地址是配置错误，不发起任何网络请求
        if let [only] = config.mode.channels() {
            if addressing.address_for(*only).is_none() {
                return Err(ConfigurationError::MissingAddress {
                    flag: Addressing::flag_for(*only),
                    mode: config.mode,
                }
                .into());
            }
        }

        let token = self
            .credentials
            .obtain_token(&config.credentials_file, &SCOPES)
            .await?;

        let (push, document) = tokio::join!(
            self.attempt(Channel::Push, config, addressing, event, &token),
            self.attempt(Channel::Document, config, addressing, event, &token),
        );
        let outcomes: Vec<Outcome> = push.into_iter().chain(document).collect();

        let report = Report { outcomes };
        info!(
            "Dispatch finished: {} channel(s), delivered={}",
            report.outcomes.len(),
            report.delivered()
        );
        Ok(report)
    }

    /// 发送单个渠道；未被模式选中时返回 None
    async fn attempt(
        &self,
        channel: Channel,
        config: &Configuration,
        addressing: &Addressing,
        event: &EventRequest,
        token: &AccessToken,
    ) -> Option<Outcome> {
        if !config.mode.channels().contains(&channel) {
            return None;
        }

        let outcome = match (addressing.address_for(channel), self.registry.get(channel)) {
            (None, _) => Outcome::skipped(channel, skip_reason(channel)),
            (Some(_), None) => {
                error!("No sender registered for {:?}", channel);
                Outcome::skipped(channel, "No sender registered")
            }
            (Some(address), Some(sender)) => {
                match sender.send(token, &config.project_id, address, event).await {
                    Ok(outcome) => outcome,
                    Err(e) => Outcome::failed(channel, &e),
                }
            }
        };

        report(&outcome);
        Some(outcome)
    }
}

fn skip_reason(channel: Channel) -> &'static str {
    match channel {
        Channel::Push => "No token provided",
        Channel::Document => "No device-id provided",
    }
}

/// 每个渠道结果都输出给操作者，失败写到 stderr
fn report(outcome: &Outcome) {
    match outcome.status {
        OutcomeStatus::Failed => eprintln!("{outcome}"),
        OutcomeStatus::Sent | OutcomeStatus::Skipped => println!("{outcome}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::{MockTransport, StaticCredentials};
    use common::{DeliveryMode, MessageKind};
    use fcm::PushSender;
    use firestore::DocumentSender;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<MockTransport>,
        credentials: Arc<StaticCredentials>,
    }

    fn harness(transport: MockTransport, credentials: StaticCredentials) -> Harness {
        let transport = Arc::new(transport);
        let credentials = Arc::new(credentials);

        let mut registry = ChannelRegistry::new();
        registry.register(Box::new(PushSender::new(transport.clone())));
        registry.register(Box::new(DocumentSender::new(transport.clone())));

        Harness {
            dispatcher: Dispatcher::new(credentials.clone(), registry),
            transport,
            credentials,
        }
    }

    fn config(key: &NamedTempFile, mode: DeliveryMode) -> Configuration {
        Configuration {
            project_id: "ccpush-demo".to_string(),
            credentials_file: key.path().to_path_buf(),
            mode,
        }
    }

    fn addressing(token: Option<&str>, device_id: Option<&str>) -> Addressing {
        Addressing {
            push_token: token.map(str::to_string),
            device_id: device_id.map(str::to_string),
        }
    }

    fn event() -> EventRequest {
        EventRequest::new(MessageKind::Complete, "构建完成", "项目构建成功，耗时 30 秒")
            .extra("session_id", "s1")
    }

    #[tokio::test]
    async fn test_document_mode_created() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(
            MockTransport::new().respond("/devices/abc123/messages", 201, "{}"),
            StaticCredentials::new("ya29"),
        );

        let report = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Document),
                &addressing(None, Some("abc123")),
                &event(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 1);
        let outcome = report.outcome(Channel::Document).unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Sent);
        assert!(report.delivered());
        assert_eq!(report.exit_status(), 0);

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with(
            "/ccpush-demo/databases/(default)/documents/devices/abc123/messages"
        ));
        assert_eq!(requests[0].query[0], ("documentId".to_string(), outcome.detail.clone()));
        let fields = &requests[0].json_body().unwrap()["fields"];
        assert_eq!(fields["sessionId"]["stringValue"], "s1");
        assert_eq!(fields["projectName"]["stringValue"], "Unknown");
    }

    #[tokio::test]
    async fn test_push_mode_without_token_is_configuration_error() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(MockTransport::new(), StaticCredentials::new("ya29"));

        let err = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Push),
                &addressing(None, Some("abc123")),
                &event(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Configuration(ConfigurationError::MissingAddress { flag: "--token", .. })
        ));
        assert_eq!(err.to_string(), "--token is required for fcm mode");
        assert_eq!(h.transport.request_count(), 0);
        assert!(h.credentials.calls().is_empty());
    }

    #[tokio::test]
    async fn test_document_mode_without_device_id_is_configuration_error() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(MockTransport::new(), StaticCredentials::new("ya29"));

        let err = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Document),
                &addressing(Some("tok"), Some("")),
                &event(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Configuration(_)));
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_both_mode_one_failure_still_delivers() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(
            MockTransport::new()
                .respond("messages:send", 500, "internal")
                .respond("/devices/abc123/messages", 200, "{}"),
            StaticCredentials::new("ya29"),
        );

        let report = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Both),
                &addressing(Some("tok"), Some("abc123")),
                &event(),
            )
            .await
            .unwrap();

        let push = report.outcome(Channel::Push).unwrap();
        assert_eq!(push.status, OutcomeStatus::Failed);
        assert_eq!(push.detail, "Failed: 500 - internal");
        assert_eq!(
            report.outcome(Channel::Document).unwrap().status,
            OutcomeStatus::Sent
        );
        assert!(report.delivered());
        assert_eq!(report.exit_status(), 0);
        assert_eq!(h.transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_both_mode_authenticates_once() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(
            MockTransport::new()
                .respond("messages:send", 200, r#"{"name": "projects/p/messages/1"}"#)
                .respond("/messages", 201, "{}"),
            StaticCredentials::new("ya29"),
        );

        let report = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Both),
                &addressing(Some("tok"), Some("abc123")),
                &event(),
            )
            .await
            .unwrap();

        assert!(report.outcomes.iter().all(Outcome::is_sent));
        let calls = h.credentials.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, key.path().to_path_buf());
        assert_eq!(calls[0].1, SCOPES.map(str::to_string).to_vec());
        assert!(
            h.transport
                .requests()
                .iter()
                .all(|r| r.bearer.as_deref() == Some("ya29"))
        );
    }

    #[tokio::test]
    async fn test_both_mode_missing_token_skips_push() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(
            MockTransport::new().respond("/devices/abc123/messages", 503, "unavailable"),
            StaticCredentials::new("ya29"),
        );

        let report = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Both),
                &addressing(None, Some("abc123")),
                &event(),
            )
            .await
            .unwrap();

        let push = report.outcome(Channel::Push).unwrap();
        assert_eq!(push.status, OutcomeStatus::Skipped);
        assert_eq!(push.detail, "No token provided");
        assert_eq!(
            report.outcome(Channel::Document).unwrap().status,
            OutcomeStatus::Failed
        );
        assert!(!report.delivered());
        assert_eq!(report.exit_status(), 1);
        assert_eq!(h.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_both_mode_missing_device_id_skips_document() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(
            MockTransport::new().respond("messages:send", 200, "{}"),
            StaticCredentials::new("ya29"),
        );

        let report = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Both),
                &addressing(Some("tok"), None),
                &event(),
            )
            .await
            .unwrap();

        assert_eq!(
            report.outcome(Channel::Document).unwrap().status,
            OutcomeStatus::Skipped
        );
        assert!(report.delivered());
    }

    #[tokio::test]
    async fn test_both_mode_without_addresses_is_not_delivered() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(MockTransport::new(), StaticCredentials::new("ya29"));

        let report = h
            .dispatcher
            .run(&config(&key, DeliveryMode::Both), &addressing(None, None), &event())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| o.status == OutcomeStatus::Skipped)
        );
        assert!(!report.delivered());
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_file_aborts() {
        let h = harness(MockTransport::new(), StaticCredentials::new("ya29"));
        let config = Configuration {
            project_id: "ccpush-demo".to_string(),
            credentials_file: PathBuf::from("/nonexistent/service-account.json"),
            mode: DeliveryMode::Both,
        };

        let err = h
            .dispatcher
            .run(&config, &addressing(Some("tok"), Some("abc123")), &event())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Configuration(ConfigurationError::MissingCredentialsFile(_))
        ));
        assert!(h.credentials.calls().is_empty());
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_credential_failure_aborts_before_channels() {
        let key = NamedTempFile::new().unwrap();
        let h = harness(MockTransport::new(), StaticCredentials::failing());

        let err = h
            .dispatcher
            .run(
                &config(&key, DeliveryMode::Both),
                &addressing(Some("tok"), Some("abc123")),
                &event(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Credential(_)));
        assert_eq!(h.credentials.calls().len(), 1);
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_sender_is_skipped() {
        let key = NamedTempFile::new().unwrap();
        let credentials = Arc::new(StaticCredentials::new("ya29"));
        let dispatcher = Dispatcher::new(credentials, ChannelRegistry::new());

        let report = dispatcher
            .run(
                &config(&key, DeliveryMode::Push),
                &addressing(Some("tok"), None),
                &event(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcomes[0].status, OutcomeStatus::Skipped);
        assert!(!report.delivered());
    }
}
