//! API-key authentication applied at the transport boundary.
//!
//! Credentials are looked up in a fixed order: the configured header,
//! then `Authorization: Bearer <token>`, then the configured query
//! parameter. The first source present wins. Authentication is disabled by
//! default, in which case every request passes as `anonymous`.

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub const DEFAULT_HEADER_NAME: &str = "x-api-key";
pub const DEFAULT_QUERY_PARAM: &str = "api_key";
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// One accepted API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ApiKeyConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            metadata: None,
            scopes: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// Declarative part of the authentication setup, as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    #[serde(default)]
    pub keys: Vec<ApiKeyConfig>,
}

fn default_header_name() -> String {
    DEFAULT_HEADER_NAME.to_string()
}

fn default_query_param() -> String {
    DEFAULT_QUERY_PARAM.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: default_header_name(),
            query_param: default_query_param(),
            keys: Vec::new(),
        }
    }
}

/// The parts of an incoming request authentication looks at.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl AuthRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    fn query_value(&self, name: &str) -> Option<String> {
        let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri).ok()?;
        params.remove(name)
    }
}

/// Outcome of validating a credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AuthResult {
    pub fn success(client_id: impl Into<String>) -> Self {
        Self {
            success: true,
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// What a custom authenticator may answer: a bare yes/no or a full result.
#[derive(Debug, Clone)]
pub enum AuthVerdict {
    Flag(bool),
    Result(AuthResult),
}

impl From<bool> for AuthVerdict {
    fn from(allowed: bool) -> Self {
        Self::Flag(allowed)
    }
}

impl From<AuthResult> for AuthVerdict {
    fn from(result: AuthResult) -> Self {
        Self::Result(result)
    }
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Correlation id for logs; carries no authority.
    pub request_id: String,
    pub authenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub request_id: String,
    pub path: String,
    pub message: String,
}

/// A rejected request. Renders as a 401 JSON body.
#[derive(Debug, Clone)]
pub struct AuthRejection {
    pub request_id: String,
    pub message: String,
}

impl AuthRejection {
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": "Unauthorized",
            "message": self.message,
            "requestId": self.request_id,
        })
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self.body())).into_response()
    }
}

pub type AuthenticateFn = Arc<dyn Fn(String, AuthRequest) -> BoxFuture<'static, AuthVerdict> + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(&AuthContext) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&AuthFailure) + Send + Sync>;

/// Runtime authenticator shared by every transport.
#[derive(Clone)]
pub struct ApiKeyAuth {
    config: AuthConfig,
    authenticate: Option<AuthenticateFn>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

impl ApiKeyAuth {
    pub fn new(config: AuthConfig) -> Self {
        if !config.enabled {
            tracing::warn!("API key authentication is disabled; all requests are accepted as anonymous");
        }
        Self {
            config,
            authenticate: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Accept every request.
    pub fn disabled() -> Self {
        Self::new(AuthConfig::default())
    }

    /// Replace built-in key matching with a custom check.
    pub fn with_authenticator<F, Fut, V>(mut self, f: F) -> Self
    where
        F: Fn(String, AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = V> + Send + 'static,
        V: Into<AuthVerdict>,
    {
        let f = Arc::new(f);
        self.authenticate = Some(Arc::new(
            move |token: String, request: AuthRequest| -> BoxFuture<'static, AuthVerdict> {
                let f = Arc::clone(&f);
                Box::pin(async move { f(token, request).await.into() })
            },
        ));
        self
    }

    pub fn on_success(mut self, hook: impl Fn(&AuthContext) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl Fn(&AuthFailure) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthContext, AuthRejection> {
        let request_id = generate_request_id();

        if !self.config.enabled {
            return Ok(AuthContext {
                client_id: ANONYMOUS_CLIENT.to_string(),
                scopes: Vec::new(),
                metadata: None,
                request_id,
                authenticated_at: Utc::now(),
            });
        }

        let Some(token) = self.extract_credential(request) else {
            return Err(self.reject(request, request_id, "API key required"));
        };

        let result = match &self.authenticate {
            Some(authenticate) => match authenticate(token, request.clone()).await {
                AuthVerdict::Flag(true) => AuthResult::success("authenticated"),
                AuthVerdict::Flag(false) => AuthResult::failure("Invalid API key"),
                AuthVerdict::Result(result) => result,
            },
            None => self.validate_key(&token),
        };

        if !result.success {
            let message = result.error.unwrap_or_else(|| "Invalid API key".to_string());
            return Err(self.reject(request, request_id, message));
        }

        let context = AuthContext {
            client_id: result.client_id.unwrap_or_else(|| "authenticated".to_string()),
            scopes: result.scopes,
            metadata: result.metadata,
            request_id,
            authenticated_at: Utc::now(),
        };

        tracing::info!(
            request_id = %context.request_id,
            client_id = %context.client_id,
            path = request.path(),
            "Request authenticated"
        );
        if let Some(hook) = &self.on_success {
            hook(&context);
        }

        Ok(context)
    }

    /// The credential presented by `request`, from the first source that has one.
    pub fn extract_credential(&self, request: &AuthRequest) -> Option<String> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        if let Some(value) = request
            .headers
            .get(self.config.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(non_empty)
        {
            return Some(value);
        }

        if let Some(token) = request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(non_empty)
        {
            return Some(token);
        }

        request
            .query_value(&self.config.query_param)
            .filter(|v| !v.is_empty())
    }

    fn validate_key(&self, token: &str) -> AuthResult {
        match self.config.keys.iter().find(|k| k.key == token) {
            Some(key) => AuthResult {
                success: true,
                client_id: Some(key.name.clone().unwrap_or_else(|| "api-key".to_string())),
                scopes: key.scopes.clone(),
                metadata: key.metadata.clone(),
                error: None,
            },
            None => AuthResult::failure("Invalid API key"),
        }
    }

    fn reject(&self, request: &AuthRequest, request_id: String, message: impl Into<String>) -> AuthRejection {
        let failure = AuthFailure {
            request_id,
            path: request.path().to_string(),
            message: message.into(),
        };

        tracing::warn!(
            request_id = %failure.request_id,
            path = %failure.path,
            reason = %failure.message,
            "Authentication failed"
        );
        if let Some(hook) = &self.on_failure {
            hook(&failure);
        }

        AuthRejection {
            request_id: failure.request_id,
            message: failure.message,
        }
    }
}

/// `req_<unix millis>_<9 random alphanumerics>`.
pub fn generate_request_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("req_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

/// axum middleware: authenticate and stash the [`AuthContext`] in the
/// request extensions, or answer 401.
pub async fn require_api_key(
    State(auth): State<Arc<ApiKeyAuth>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_request = AuthRequest::new(
        request.method().clone(),
        request.uri().clone(),
        request.headers().clone(),
    );

    match auth.authenticate(&auth_request).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(uri: &str, headers: &[(&str, &str)]) -> AuthRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        AuthRequest::new(Method::GET, uri.parse().unwrap(), map)
    }

    fn enabled() -> AuthConfig {
        AuthConfig {
            enabled: true,
            keys: vec![
                ApiKeyConfig::new("header-key").name("header-client").scopes(["read"]),
                ApiKeyConfig::new("query-key").name("query-client"),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_by_default_is_anonymous() {
        let auth = ApiKeyAuth::new(AuthConfig::default());
        let context = auth.authenticate(&request("/sse", &[])).await.unwrap();
        assert_eq!(context.client_id, "anonymous");
        assert!(context.request_id.starts_with("req_"));
    }

    #[tokio::test]
    async fn test_valid_header_key() {
        let auth = ApiKeyAuth::new(enabled());
        let context = auth
            .authenticate(&request("/sse", &[("x-api-key", "header-key")]))
            .await
            .unwrap();
        assert_eq!(context.client_id, "header-client");
        assert_eq!(context.scopes, ["read"]);
    }

    #[tokio::test]
    async fn test_header_takes_precedence_over_query() {
        let auth = ApiKeyAuth::new(enabled());
        let context = auth
            .authenticate(&request("/sse?api_key=query-key", &[("x-api-key", "header-key")]))
            .await
            .unwrap();
        assert_eq!(context.client_id, "header-client");

        // A wrong header value is not rescued by a valid query key.
        let rejected = auth
            .authenticate(&request("/sse?api_key=query-key", &[("x-api-key", "nope")]))
            .await;
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn test_bearer_and_query_sources() {
        let auth = ApiKeyAuth::new(enabled());
        let bearer = auth
            .authenticate(&request("/", &[("authorization", "Bearer query-key")]))
            .await
            .unwrap();
        assert_eq!(bearer.client_id, "query-client");

        let query = auth.authenticate(&request("/ws?api_key=header-key", &[])).await.unwrap();
        assert_eq!(query.client_id, "header-client");
    }

    #[tokio::test]
    async fn test_custom_header_and_query_names() {
        let auth = ApiKeyAuth::new(AuthConfig {
            header_name: "x-token".to_string(),
            query_param: "token".to_string(),
            ..enabled()
        });
        assert!(auth.authenticate(&request("/", &[("x-token", "header-key")])).await.is_ok());
        assert!(auth.authenticate(&request("/?token=query-key", &[])).await.is_ok());
        assert!(auth.authenticate(&request("/?api_key=query-key", &[])).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys_are_generic() {
        let auth = ApiKeyAuth::new(enabled());
        let missing = auth.authenticate(&request("/", &[])).await.unwrap_err();
        let invalid = auth
            .authenticate(&request("/", &[("x-api-key", "wrong")]))
            .await
            .unwrap_err();

        assert_eq!(invalid.message, "Invalid API key");
        assert_eq!(missing.message, "API key required");
        let body = invalid.body();
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["requestId"], invalid.request_id.as_str());
    }

    #[tokio::test]
    async fn test_custom_authenticator_bool_and_result() {
        let allow_all = ApiKeyAuth::new(enabled()).with_authenticator(|token, _req| async move { token == "magic" });
        assert_eq!(
            allow_all
                .authenticate(&request("/", &[("x-api-key", "magic")]))
                .await
                .unwrap()
                .client_id,
            "authenticated"
        );
        assert!(allow_all
            .authenticate(&request("/", &[("x-api-key", "header-key")]))
            .await
            .is_err());

        let structured = ApiKeyAuth::new(enabled()).with_authenticator(|token, request: AuthRequest| async move {
            AuthResult {
                success: true,
                client_id: Some(format!("{}@{}", token, request.path())),
                scopes: vec!["admin".to_string()],
                ..Default::default()
            }
        });
        let context = structured
            .authenticate(&request("/sse", &[("authorization", "Bearer t1")]))
            .await
            .unwrap();
        assert_eq!(context.client_id, "t1@/sse");
        assert_eq!(context.scopes, ["admin"]);
    }

    #[tokio::test]
    async fn test_hooks_fire() {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&successes), Arc::clone(&failures));

        let auth = ApiKeyAuth::new(enabled())
            .on_success(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_failure(move |failure| {
                assert_eq!(failure.path, "/sse");
                f.fetch_add(1, Ordering::SeqCst);
            });

        let _ = auth.authenticate(&request("/sse", &[("x-api-key", "header-key")])).await;
        let _ = auth.authenticate(&request("/sse", &[])).await;
        let _ = auth.authenticate(&request("/sse", &[("x-api-key", "bad")])).await;

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert_eq!(a.split('_').count(), 3);
    }
}
