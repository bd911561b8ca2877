//! 아웃바운드 응답 파서
//!
//! 기본 파서는 gzip을 투명하게 풀고 백엔드 디코더로 데이터 트리를 만든 뒤
//! 엔티티 포매터를 적용합니다. no-op 파서는 바디를 건드리지 않고
//! 패스스루 스트림으로 감쌉니다.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use futures_util::future::BoxFuture;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;

use crate::encoding::Decoder;

use super::http::BackendResponse;
use super::{
    BoxError, Context, EntityFormatter, Metadata, Passthrough, ProxyError, Response,
};

pub type HttpResponseParser = Arc<
    dyn Fn(Context, BackendResponse) -> BoxFuture<'static, Result<Response, ProxyError>>
        + Send
        + Sync,
>;

pub struct HttpResponseParserConfig {
    pub decoder: Decoder,
    pub formatter: EntityFormatter,
}

pub fn default_http_response_parser(cfg: HttpResponseParserConfig) -> HttpResponseParser {
    let decoder = cfg.decoder;
    let formatter = cfg.formatter;
    Arc::new(move |_ctx, resp| {
        let decoder = decoder.clone();
        let formatter = formatter.clone();
        Box::pin(async move {
            let gzipped = resp
                .headers()
                .get(http::header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("gzip"))
                .unwrap_or(false);

            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ProxyError::Transport(e.to_string()))?
                .to_bytes();

            let raw = if gzipped {
                let mut decoded = Vec::new();
                GzDecoder::new(&body[..])
                    .read_to_end(&mut decoded)
                    .map_err(|e| ProxyError::Decode(e.to_string()))?;
                decoded
            } else {
                body.to_vec()
            };

            let data = decoder(&raw)?;
            let response = Response {
                data,
                is_complete: true,
                ..Response::default()
            };
            Ok(formatter(response))
        })
    })
}

/// no-op 인코딩 백엔드용 파서. 데이터 트리는 비우고 바디를 패스스루
/// 스트림으로 넘기며, 상태와 헤더 메타데이터는 그대로 보존합니다.
pub fn no_op_http_response_parser() -> HttpResponseParser {
    Arc::new(|ctx, resp| {
        Box::pin(async move {
            let status_code = resp.status().as_u16();
            let headers = collect_headers(resp.headers());
            let stream = resp
                .into_body()
                .into_data_stream()
                .map_err(BoxError::from);

            Ok(Response {
                data: Default::default(),
                is_complete: true,
                metadata: Metadata {
                    status_code,
                    headers,
                },
                io: Some(Passthrough::new(&ctx, stream)),
            })
        })
    })
}

pub(super) fn collect_headers(headers: &http::HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(v.to_string());
        }
    }
    out
}
