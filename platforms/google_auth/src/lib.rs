use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{
    AccessToken, CredentialError, CredentialProvider, HttpRequest, HttpTransport,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// 推送和文档渠道所需的授权范围
pub const SCOPES: [&str; 2] = [FIREBASE_MESSAGING_SCOPE, DATASTORE_SCOPE];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Firebase 服务账号密钥（控制台下载的 JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// jwt-bearer 授权使用的 JWT 声明
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub scope: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// 读取服务账号密钥文件
pub async fn load_key(path: &Path) -> Result<ServiceAccountKey, CredentialError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CredentialError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| CredentialError::MalformedKey(e.to_string()))
}

/// 生成 RS256 签名断言，自 `now` 起一小时有效
pub fn sign_assertion(
    key: &ServiceAccountKey,
    scopes: &[&str],
    now: DateTime<Utc>,
) -> Result<String, CredentialError> {
    let claims = JwtClaims {
        iss: key.client_email.clone(),
        sub: key.client_email.clone(),
        scope: scopes.join(" "),
        aud: key.token_uri.clone(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| CredentialError::MalformedKey(format!("private key: {e}")))?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    encode(&header, &claims, &encoding_key).map_err(|e| CredentialError::Signing(e.to_string()))
}

/// 服务账号凭据提供者
///
/// 用签名断言向 `token_uri` 换取访问令牌，不做缓存，每次运行只获取一次。
pub struct ServiceAccountCredentials {
    transport: Arc<dyn HttpTransport>,
}

impl ServiceAccountCredentials {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    async fn exchange(
        &self,
        key: &ServiceAccountKey,
        assertion: &str,
    ) -> Result<AccessToken, CredentialError> {
        let request = HttpRequest::form(
            &key.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)],
        );
        let response = self.transport.post(request).await?;

        if response.status != 200 {
            return Err(CredentialError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let token: GoogleTokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(CredentialError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        debug!(
            "Obtained access token for {} (expires in {}s)",
            key.client_email,
            token.expires_in.unwrap_or_default()
        );
        Ok(AccessToken::new(token.access_token))
    }
}

#[async_trait]
impl CredentialProvider for ServiceAccountCredentials {
    async fn obtain_token(
        &self,
        credentials_file: &Path,
        scopes: &[&str],
    ) -> Result<AccessToken, CredentialError> {
        let key = load_key(credentials_file).await?;
        if let Some(project) = &key.project_id {
            debug!("Loaded service account {} for project {}", key.client_email, project);
        }
        let assertion = sign_assertion(&key, scopes, Utc::now())?;
        self.exchange(&key, &assertion).await
    }
}
