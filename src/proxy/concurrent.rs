use tokio::sync::mpsc;

use crate::config::Backend;

use super::{from_fn, CallResult, Context, Proxy, ProxyError, Request, Response};

/// 병행 호출 미들웨어. `concurrent_calls ≥ 2`인 백엔드에만 적용됩니다.
///
/// 백엔드 타임아웃의 75%로 자식 컨텍스트를 만들어 N개의 시도를 경주시키고,
/// 처음으로 완전한(IsComplete) 응답을 낸 시도가 이기면 나머지를 취소합니다.
/// 승자가 없으면 마지막 null 아닌 응답과 마지막 오류를 함께 돌려줍니다.
pub fn new_concurrent_middleware(remote: &Backend, next: Proxy) -> Proxy {
    let calls = remote.concurrent_calls;
    let service_timeout = remote.timeout.mul_f64(0.75);

    from_fn(move |ctx: Context, request: Request| {
        let next = next.clone();
        async move {
            let local = ctx.with_timeout(service_timeout);

            let (result_tx, mut result_rx) = mpsc::channel::<Response>(calls);
            let (failed_tx, mut failed_rx) = mpsc::channel::<ProxyError>(calls);

            for _ in 0..calls {
                tokio::spawn(process_concurrent_call(
                    local.child(),
                    next.clone(),
                    request.clone(),
                    result_tx.clone(),
                    failed_tx.clone(),
                ));
            }
            drop(result_tx);
            drop(failed_tx);

            let mut response: Option<Response> = None;
            let mut error: Option<ProxyError> = None;

            for _ in 0..calls {
                tokio::select! {
                    received = result_rx.recv() => {
                        if let Some(r) = received {
                            if r.is_complete {
                                local.cancel();
                                return CallResult::success(r);
                            }
                            response = Some(r);
                        }
                    }
                    failure = failed_rx.recv() => {
                        if let Some(e) = failure {
                            error = Some(e);
                        }
                    }
                    _ = ctx.done() => {}
                }
            }
            local.cancel();
            CallResult::partial(response, error)
        }
    })
}

async fn process_concurrent_call(
    ctx: Context,
    next: Proxy,
    request: Request,
    out: mpsc::Sender<Response>,
    failed: mpsc::Sender<ProxyError>,
) {
    let local = ctx.child();
    let result = next(local.clone(), request).await;

    if let Some(e) = result.error {
        let _ = failed.try_send(e);
        local.cancel();
        return;
    }
    let Some(response) = result.response else {
        let _ = failed.try_send(ProxyError::NullResult);
        local.cancel();
        return;
    };

    tokio::select! {
        _ = out.send(response) => {}
        _ = ctx.done() => {
            let _ = failed.try_send(ctx.error());
        }
    }
    local.cancel();
}
