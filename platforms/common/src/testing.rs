//! 测试替身：可编排响应并记录请求的传输层，以及固定令牌的凭据提供者

use crate::{
    AccessToken, CredentialError, CredentialProvider, HttpRequest, HttpResponse, HttpTransport,
    TransportError,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

enum MockReply {
    Respond(HttpResponse),
    Fail(TransportError),
}

/// 按 URL 片段匹配响应，未匹配的请求返回 404
#[derive(Default)]
pub struct MockTransport {
    routes: Vec<(String, MockReply)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url_fragment: &str, status: u16, body: &str) -> Self {
        self.routes.push((
            url_fragment.to_string(),
            MockReply::Respond(HttpResponse::new(status, body)),
        ));
        self
    }

    pub fn fail(mut self, url_fragment: &str, error: TransportError) -> Self {
        self.routes
            .push((url_fragment.to_string(), MockReply::Fail(error)));
        self
    }

    /// 已记录的全部请求
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = self
            .routes
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, reply)| match reply {
                MockReply::Respond(r) => Ok(r.clone()),
                MockReply::Fail(e) => Err(e.clone()),
            })
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "no mock route")));

        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        reply
    }
}

/// 返回固定令牌的凭据提供者，记录调用
pub struct StaticCredentials {
    token: Option<String>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl StaticCredentials {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都失败
    pub fn failing() -> Self {
        Self {
            token: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn obtain_token(
        &self,
        credentials_file: &Path,
        scopes: &[&str],
    ) -> Result<AccessToken, CredentialError> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push((
            credentials_file.to_path_buf(),
            scopes.iter().map(|s| s.to_string()).collect(),
        ));
        match &self.token {
            Some(token) => Ok(AccessToken::new(token.clone())),
            None => Err(CredentialError::Rejected {
                status: 401,
                body: "invalid_grant".to_string(),
            }),
        }
    }
}
