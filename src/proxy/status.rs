//! 아웃바운드 응답 상태 핸들러
//!
//! 기본 핸들러는 200/201만 통과시킵니다. error-code 모드는 상태 코드와
//! 바디를 담은 오류를, detailed 모드는 거기에 이름을 붙여 데이터 트리에
//! 주입될 수 있게 합니다. no-op 핸들러는 모든 상태를 그대로 통과시킵니다.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::StatusCode;
use http_body_util::{BodyExt, Full};

use crate::config::Backend;

use super::http::BackendResponse;
use super::{BoxError, Context, ProxyError};

/// HTTP 클라이언트 컴포넌트의 확장 맵 네임스페이스
pub const CLIENT_NAMESPACE: &str = "sonic/http/client";

const RETURN_ERROR_CODE_KEY: &str = "return_error_code";
const RETURN_ERROR_DETAILS_KEY: &str = "return_error_details";

pub type HttpStatusHandler = Arc<
    dyn Fn(Context, BackendResponse) -> BoxFuture<'static, Result<BackendResponse, ProxyError>>
        + Send
        + Sync,
>;

/// 백엔드 확장 맵에서 상태 핸들러를 고릅니다.
pub fn get_http_status_handler(remote: &Backend) -> HttpStatusHandler {
    if let Some(client_cfg) = remote
        .extra_config
        .get(CLIENT_NAMESPACE)
        .and_then(|v| v.as_object())
    {
        if let Some(name) = client_cfg
            .get(RETURN_ERROR_DETAILS_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return detailed_http_status_handler(name);
        }
        if client_cfg
            .get(RETURN_ERROR_CODE_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return error_http_status_handler();
        }
    }
    default_http_status_handler()
}

fn is_success(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::CREATED
}

pub fn default_http_status_handler() -> HttpStatusHandler {
    Arc::new(|_ctx, resp| {
        Box::pin(async move {
            if !is_success(resp.status()) {
                return Err(ProxyError::InvalidStatusCode);
            }
            Ok(resp)
        })
    })
}

pub fn error_http_status_handler() -> HttpStatusHandler {
    Arc::new(|_ctx, resp| {
        Box::pin(async move {
            if is_success(resp.status()) {
                return Ok(resp);
            }
            Err(response_error(resp).await)
        })
    })
}

pub fn no_op_http_status_handler() -> HttpStatusHandler {
    Arc::new(|_ctx, resp| Box::pin(async move { Ok(resp) }))
}

pub fn detailed_http_status_handler(name: &str) -> HttpStatusHandler {
    let name = name.to_string();
    Arc::new(move |_ctx, resp| {
        let name = name.clone();
        Box::pin(async move {
            if is_success(resp.status()) {
                return Ok(resp);
            }
            match response_error(resp).await {
                ProxyError::HttpResponse { code, body } => {
                    Err(ProxyError::NamedHttpResponse { name, code, body })
                }
                other => Err(other),
            }
        })
    })
}

/// 응답 바디를 읽어 상태 코드와 함께 오류로 만듭니다.
async fn response_error(resp: BackendResponse) -> ProxyError {
    let code = resp.status().as_u16();
    let body = match resp.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
        Err(_) => String::new(),
    };
    ProxyError::HttpResponse { code, body }
}

/// 테스트와 내부 구성용: 버퍼에서 BackendResponse를 만듭니다.
pub(super) fn backend_response_from_bytes(
    status: StatusCode,
    headers: Vec<(&str, &str)>,
    body: bytes::Bytes,
) -> BackendResponse {
    let mut builder = http::Response::builder().status(status);
    for (k, v) in headers {
        builder = builder.header(k, v);
    }
    builder
        .body(Full::new(body).map_err(|e| BoxError::from(e)).boxed())
        .unwrap_or_else(|_| {
            http::Response::new(Full::new(bytes::Bytes::new()).map_err(BoxError::from).boxed())
        })
}
