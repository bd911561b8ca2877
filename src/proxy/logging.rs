use std::time::Instant;

use tracing::{debug, info, warn};

use super::{from_fn, Context, Proxy, Request};

/// 프록시 호출을 감싸 소요 시간과 실패를 기록하는 미들웨어
pub fn new_logging_middleware(name: &str, next: Proxy) -> Proxy {
    let segment = name.to_uppercase();

    from_fn(move |ctx: Context, request: Request| {
        let next = next.clone();
        let segment = segment.clone();
        async move {
            let begin = Instant::now();
            info!(segment = %segment, "Calling backend");
            debug!(segment = %segment, method = %request.method, path = %request.path, "Request");

            let result = next(ctx, request).await;

            info!(
                segment = %segment,
                duration_ms = begin.elapsed().as_millis() as u64,
                "Call to backend completed"
            );
            if let Some(error) = &result.error {
                warn!(segment = %segment, error = %error, "Call to backend failed");
            } else if result.response.is_none() {
                warn!(segment = %segment, "Call to backend returned a null response");
            }

            result
        }
    })
}
