//! 프록시 코어 모듈
//!
//! 파이프라인의 중심 추상은 `(Context, Request) → CallResult` 함수인
//! `Proxy`입니다. 미들웨어는 안쪽 프록시를 감싸 새 프록시를 만드는
//! 생성자 함수로 표현되며, 하나를 감싸는 미들웨어는 `next: Proxy`를,
//! 여러 개를 합치는 병합 미들웨어는 `Vec<Proxy>`를 받습니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::discovery::DiscoveryError;
use crate::encoding::DecodeError;

mod balancing;
mod concurrent;
mod factory;
mod flatmap;
mod formatter;
mod graphql;
mod http;
mod logging;
mod merging;
mod parser;
pub mod plugin;
mod request;
mod response;
mod shadow;
mod static_data;
mod status;

pub use balancing::{new_load_balanced_middleware, new_load_balanced_middleware_with_subscriber};
pub use concurrent::new_concurrent_middleware;
pub use factory::{default_factory, new_default_factory, BackendFactory, DefaultFactory, Factory};
pub use flatmap::new_flatmap_middleware;
pub use formatter::{new_entity_formatter, EntityFormatter};
pub use graphql::{new_graphql_middleware, GRAPHQL_NAMESPACE};
pub use http::{
    default_http_request_executor, http_proxy_factory, new_http_proxy, new_http_proxy_detailed,
    new_request_builder_middleware, BackendResponse, HttpRequestExecutor,
};
pub use logging::new_logging_middleware;
pub use merging::{
    new_merge_data_middleware, register_response_combiner, ResponseCombiner,
};
pub use parser::{
    default_http_response_parser, no_op_http_response_parser, HttpResponseParser,
    HttpResponseParserConfig,
};
pub use plugin::{new_backend_plugin_middleware, new_plugin_middleware};
pub use request::Request;
pub use response::{Metadata, Passthrough, Response};
pub use shadow::{new_shadow_factory, new_shadow_proxy, ShadowFactory};
pub use static_data::new_static_middleware;
pub use status::{
    default_http_status_handler, detailed_http_status_handler, error_http_status_handler,
    get_http_status_handler, no_op_http_status_handler, HttpStatusHandler, CLIENT_NAMESPACE,
};

pub use crate::encoding::JsonObject;

/// 프록시 컴포넌트가 확장 맵에서 쓰는 네임스페이스
pub const NAMESPACE: &str = "sonic/proxy";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 파이프라인의 중심 추상: 요청을 받아 응답(과 오류)을 돌려주는 비동기 함수
pub type Proxy = Arc<dyn Fn(Context, Request) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// 비동기 클로저를 `Proxy`로 감쌉니다.
pub fn from_fn<F, Fut>(f: F) -> Proxy
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = CallResult> + Send + 'static,
{
    Arc::new(move |ctx, request| Box::pin(f(ctx, request)))
}

/// 프록시 호출 결과.
///
/// 병합 단계의 부분 실패에서는 응답과 오류가 함께 존재할 수 있습니다.
#[derive(Debug, Default)]
pub struct CallResult {
    pub response: Option<Response>,
    pub error: Option<ProxyError>,
}

impl CallResult {
    pub fn success(response: Response) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: ProxyError) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    /// 병합된 부분 결과와 첫 오류를 함께 돌려줄 때 씁니다.
    pub fn partial(response: Option<Response>, error: Option<ProxyError>) -> Self {
        Self { response, error }
    }

    /// 완전한(IsComplete) 응답이면서 오류가 없는 결과인지
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
            && self
                .response
                .as_ref()
                .map(|r| r.is_complete)
                .unwrap_or(false)
    }
}

impl From<Result<Response, ProxyError>> for CallResult {
    fn from(result: Result<Response, ProxyError>) -> Self {
        match result {
            Ok(response) => Self::success(response),
            Err(error) => Self::failure(error),
        }
    }
}

/// 취소와 데드라인, 값 조회를 함께 나르는 호출 컨텍스트.
///
/// 파생 컨텍스트는 부모가 취소되면 함께 취소됩니다. 섀도 경로는
/// `detached`로 취소 계보만 끊고 값 조회는 유지합니다.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<HashMap<String, Value>>,
}

impl Context {
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            values: Arc::new(HashMap::new()),
        }
    }

    /// 부모 취소를 물려받는 자식 컨텍스트
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            values: Arc::clone(&self.values),
        }
    }

    /// 자식 컨텍스트에 타임아웃을 더합니다. 기존 데드라인보다 늦출 수는
    /// 없습니다.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            values: Arc::clone(&self.values),
        }
    }

    /// 취소 계보는 새로 시작하고 값 조회만 이어받는 컨텍스트
    pub fn detached(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            values: Arc::clone(&self.values),
        }
    }

    pub fn with_value(&self, key: &str, value: Value) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.to_string(), value);
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .map(|d| Instant::now() >= d)
                .unwrap_or(false)
    }

    /// 취소 또는 데드라인 경과 시 완료되는 future
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// 컨텍스트가 끝난 이유
    pub fn error(&self) -> ProxyError {
        if self.token.is_cancelled() {
            ProxyError::Canceled
        } else {
            ProxyError::DeadlineExceeded
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum ProxyError {
    /// 엔드포인트에 백엔드가 하나도 없음
    NoBackends,
    /// null 응답 (병행 호출에서 집계됨)
    NullResult,
    /// 2xx 이외의 상태 코드 (기본 핸들러)
    InvalidStatusCode,
    Canceled,
    DeadlineExceeded,
    /// 상태 코드와 바디를 담은 백엔드 오류 (error-code 모드)
    HttpResponse { code: u16, body: String },
    /// 이름이 붙은 백엔드 오류. 데이터 트리에 `error_<name>` 키로 주입됨
    NamedHttpResponse { name: String, code: u16, body: String },
    Transport(String),
    Http(String),
    Url(String),
    Decode(String),
    Plugin(String),
    Discovery(DiscoveryError),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackends => write!(f, "all endpoints must have at least one backend"),
            Self::NullResult => write!(f, "invalid response"),
            Self::InvalidStatusCode => write!(f, "Invalid status code"),
            Self::Canceled => write!(f, "context canceled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
            Self::HttpResponse { body, .. } => write!(f, "{}", body),
            Self::NamedHttpResponse { body, .. } => write!(f, "{}", body),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Http(msg) => write!(f, "http error: {}", msg),
            Self::Url(msg) => write!(f, "url error: {}", msg),
            Self::Decode(msg) => write!(f, "{}", msg),
            Self::Plugin(msg) => write!(f, "plugin error: {}", msg),
            Self::Discovery(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<DiscoveryError> for ProxyError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(e: url::ParseError) -> Self {
        Self::Url(e.to_string())
    }
}

impl From<DecodeError> for ProxyError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();

        assert!(!child.is_done());
        parent.cancel();
        assert!(child.is_done());
        assert!(matches!(child.error(), ProxyError::Canceled));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_alive() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(ctx.is_done());
        assert!(matches!(ctx.error(), ProxyError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_timeout_cannot_extend_parent_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert!(child.deadline().unwrap() <= parent.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_detached_keeps_values_but_not_cancellation() {
        let parent = Context::background().with_value("request-id", Value::from("abc"));
        let detached = parent.detached();

        parent.cancel();
        assert!(!detached.is_done());
        assert_eq!(detached.value("request-id"), Some(&Value::from("abc")));
    }

    #[test]
    fn test_call_result_completeness() {
        let complete = CallResult::success(Response {
            is_complete: true,
            ..Response::default()
        });
        assert!(complete.is_complete());

        let incomplete = CallResult::success(Response::default());
        assert!(!incomplete.is_complete());

        let failed = CallResult::failure(ProxyError::NullResult);
        assert!(!failed.is_complete());
    }
}
