use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderName, HeaderValue, Method, Request as HttpRequest, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::json;

use crate::config::Backend;
use crate::encoding::{self, Decoder};

use super::parser::{
    default_http_response_parser, no_op_http_response_parser, HttpResponseParser,
    HttpResponseParserConfig,
};
use super::status::{get_http_status_handler, no_op_http_status_handler, HttpStatusHandler};
use super::{
    from_fn, new_entity_formatter, BoxError, CallResult, Context, JsonObject, Proxy, ProxyError,
    Request, Response,
};

/// 아웃바운드 응답. 테스트가 페이크 바디를 만들 수 있도록 boxed body를
/// 씁니다.
pub type BackendResponse = http::Response<BoxBody<Bytes, BoxError>>;

/// 실제 HTTP 호출을 수행하는 실행기
pub type HttpRequestExecutor = Arc<
    dyn Fn(Context, HttpRequest<Full<Bytes>>) -> BoxFuture<'static, Result<BackendResponse, ProxyError>>
        + Send
        + Sync,
>;

/// 백엔드 설정으로 프록시를 만드는 팩토리
pub type BackendProxyFactory = Arc<dyn Fn(&Backend) -> Proxy + Send + Sync>;

/// hyper 레거시 클라이언트 기반 기본 실행기
pub fn default_http_request_executor() -> HttpRequestExecutor {
    let client = legacy::Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(
        HttpConnector::new(),
    );
    Arc::new(move |_ctx, req| {
        let client = client.clone();
        Box::pin(async move {
            let resp = client
                .request(req)
                .await
                .map_err(|e| ProxyError::Transport(e.to_string()))?;
            Ok(resp.map(|body| body.map_err(BoxError::from).boxed()))
        })
    })
}

/// 실행기를 고정한 백엔드 프록시 팩토리
pub fn http_proxy_factory(executor: HttpRequestExecutor) -> BackendProxyFactory {
    Arc::new(move |backend: &Backend| {
        new_http_proxy(backend, executor.clone(), backend.decoder.clone())
    })
}

pub fn new_http_proxy(remote: &Backend, re: HttpRequestExecutor, decoder: Decoder) -> Proxy {
    if remote.encoding == encoding::NOOP {
        return new_http_proxy_detailed(
            remote,
            re,
            no_op_http_status_handler(),
            no_op_http_response_parser(),
        );
    }

    let formatter = new_entity_formatter(remote);
    let parser = default_http_response_parser(HttpResponseParserConfig { decoder, formatter });
    new_http_proxy_detailed(remote, re, get_http_status_handler(remote), parser)
}

pub fn new_http_proxy_detailed(
    _remote: &Backend,
    re: HttpRequestExecutor,
    status_handler: HttpStatusHandler,
    response_parser: HttpResponseParser,
) -> Proxy {
    from_fn(move |ctx: Context, request: Request| {
        let re = re.clone();
        let status_handler = status_handler.clone();
        let response_parser = response_parser.clone();
        async move {
            match call_backend(ctx, request, re, status_handler, response_parser).await {
                Ok(response) => CallResult::success(response),
                Err(e) => CallResult::failure(e),
            }
        }
    })
}

async fn call_backend(
    ctx: Context,
    request: Request,
    re: HttpRequestExecutor,
    status_handler: HttpStatusHandler,
    response_parser: HttpResponseParser,
) -> Result<Response, ProxyError> {
    let outbound = build_outbound_request(&request)?;

    let resp = tokio::select! {
        result = re(ctx.clone(), outbound) => result?,
        _ = ctx.done() => return Err(ctx.error()),
    };

    if ctx.is_done() {
        return Err(ctx.error());
    }

    let resp = match status_handler(ctx.clone(), resp).await {
        Ok(resp) => resp,
        Err(ProxyError::NamedHttpResponse { name, code, body }) => {
            // detailed 모드: 이름 붙은 오류를 데이터 트리에 주입한다
            let mut data = JsonObject::new();
            data.insert(
                format!("error_{}", name),
                json!({ "http_status_code": code, "http_body": body }),
            );
            return Ok(Response {
                data,
                is_complete: false,
                metadata: super::Metadata {
                    status_code: code,
                    headers: Default::default(),
                },
                io: None,
            });
        }
        Err(e) => return Err(e),
    };

    response_parser(ctx, resp).await
}

fn build_outbound_request(request: &Request) -> Result<HttpRequest<Full<Bytes>>, ProxyError> {
    let url = request
        .url
        .as_ref()
        .ok_or_else(|| ProxyError::Http("request url is not resolved".to_string()))?;

    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::Http(e.to_string()))?;
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|e| ProxyError::Http(e.to_string()))?;

    let body = request.body.clone().unwrap_or_default();
    let mut outbound = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(body))
        .map_err(|e| ProxyError::Http(e.to_string()))?;

    let headers = outbound.headers_mut();
    for (name, values) in &request.headers {
        // chunked 표기나 숫자가 아닌 Content-Length는 전달하지 않는다
        if name.eq_ignore_ascii_case("content-length") {
            let numeric = values.len() == 1
                && values[0] != "chunked"
                && values[0].parse::<u64>().is_ok();
            if !numeric || request.body.is_none() {
                continue;
            }
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), header_value);
            }
        }
    }

    Ok(outbound)
}

/// 인바운드 요청을 복제해 백엔드 URL 템플릿과 메서드를 적용하는
/// 미들웨어. 스택의 가장 바깥에서 실행됩니다.
pub fn new_request_builder_middleware(remote: &Backend, next: Proxy) -> Proxy {
    let url_pattern = remote.url_pattern.clone();
    let method = remote.method.clone();

    from_fn(move |ctx: Context, request: Request| {
        let next = next.clone();
        let url_pattern = url_pattern.clone();
        let method = method.clone();
        async move {
            let mut r = request;
            r.generate_path(&url_pattern);
            r.method = method;
            next(ctx, r).await
        }
    })
}
