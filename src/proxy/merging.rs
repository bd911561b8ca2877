//! 응답 병합 미들웨어
//!
//! 여러 백엔드 프록시를 엔드포인트 프록시 하나로 합칩니다. 기본은 병렬
//! fan-out이고, 확장 맵의 `sequential` 플래그가 있으면 선언 순서대로
//! 실행하며 이전 응답의 값을 `{RespN_field}` 파라미터로 이어줍니다.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

use crate::config::EndpointConfig;
use crate::register::Untyped;

use super::{
    from_fn, CallResult, Context, JsonObject, Proxy, ProxyError, Request, Response,
};

const IS_SEQUENTIAL_KEY: &str = "sequential";
const MERGE_KEY: &str = "combiner";

/// 파트들을 하나의 응답으로 합치는 전략. 첫 인자는 선언된 백엔드 수,
/// 둘째는 null이 아닌 파트들(선언 순서)입니다.
pub type ResponseCombiner = Arc<dyn Fn(usize, Vec<Response>) -> Response + Send + Sync>;

static SEQUENTIAL_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[Rr]esp([0-9]+)_(.*)$").expect("sequential key pattern"));

static COMBINERS: Lazy<Untyped<ResponseCombiner>> = Lazy::new(Untyped::new);

pub fn register_response_combiner(name: &str, combiner: ResponseCombiner) {
    COMBINERS.register(name, combiner);
}

fn get_response_combiner(endpoint: &EndpointConfig) -> ResponseCombiner {
    endpoint
        .extra_config
        .get(super::NAMESPACE)
        .and_then(|v| v.as_object())
        .and_then(|cfg| cfg.get(MERGE_KEY))
        .and_then(|v| v.as_str())
        .and_then(|name| COMBINERS.get(name))
        .unwrap_or_else(|| Arc::new(combine_data))
}

fn is_sequential(endpoint: &EndpointConfig) -> bool {
    endpoint
        .extra_config
        .get(super::NAMESPACE)
        .and_then(|v| v.as_object())
        .and_then(|cfg| cfg.get(IS_SEQUENTIAL_KEY))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// 백엔드 프록시들을 엔드포인트 프록시로 병합합니다.
pub fn new_merge_data_middleware(endpoint: &EndpointConfig, next: Vec<Proxy>) -> Proxy {
    let total = next.len();
    if total == 1 {
        return next.into_iter().next().unwrap_or_else(|| {
            from_fn(|_ctx, _request| async { CallResult::failure(ProxyError::NoBackends) })
        });
    }

    let combiner = get_response_combiner(endpoint);
    // 병합 전체는 엔드포인트 타임아웃의 85%로 묶는다
    let merge_timeout = endpoint.timeout.mul_f64(0.85);

    if is_sequential(endpoint) {
        let patterns: Vec<Vec<String>> = endpoint
            .backend
            .iter()
            .map(|b| b.url_keys.clone())
            .collect();
        new_sequential_merge(next, merge_timeout, combiner, patterns)
    } else {
        new_parallel_merge(next, merge_timeout, combiner)
    }
}

fn new_parallel_merge(
    next: Vec<Proxy>,
    timeout: std::time::Duration,
    combiner: ResponseCombiner,
) -> Proxy {
    let total = next.len();

    from_fn(move |ctx: Context, request: Request| {
        let proxies = next.clone();
        let combiner = combiner.clone();
        async move {
            let local = ctx.with_timeout(timeout);

            let mut handles = Vec::with_capacity(total);
            for proxy in &proxies {
                let fut = proxy(local.child(), request.clone());
                handles.push(tokio::spawn(fut));
            }

            let mut acc = MergeAccumulator::new(total, combiner.clone());
            for handle in handles {
                match handle.await {
                    Ok(result) => acc.merge(result.response, result.error),
                    Err(e) => acc.merge(None, Some(ProxyError::Transport(e.to_string()))),
                }
            }

            local.cancel();
            acc.result()
        }
    })
}

fn new_sequential_merge(
    next: Vec<Proxy>,
    timeout: std::time::Duration,
    combiner: ResponseCombiner,
    url_keys: Vec<Vec<String>>,
) -> Proxy {
    let total = next.len();

    from_fn(move |ctx: Context, request: Request| {
        let proxies = next.clone();
        let combiner = combiner.clone();
        let url_keys = url_keys.clone();
        async move {
            let local = ctx.with_timeout(timeout);
            let mut acc = MergeAccumulator::new(total, combiner.clone());
            let mut parts: Vec<Option<Response>> = Vec::with_capacity(total);

            for (i, proxy) in proxies.iter().enumerate() {
                let mut part_request = request.clone();
                if i > 0 {
                    propagate_sequential_params(&mut part_request, &url_keys[i], &parts);
                }

                let result = proxy(local.child(), part_request).await;
                let errored = result.error.is_some();
                let incomplete = !result
                    .response
                    .as_ref()
                    .map(|r| r.is_complete)
                    .unwrap_or(false);

                // 병합 전에 파트를 보관해 이후 백엔드가 참조할 수 있게 한다
                match &result.response {
                    Some(r) if r.is_complete => parts.push(Some(Response {
                        data: r.data.clone(),
                        is_complete: r.is_complete,
                        metadata: r.metadata.clone(),
                        io: None,
                    })),
                    _ => parts.push(None),
                }

                acc.merge(result.response, result.error);

                // 오류나 불완전 응답은 체인을 중단하되 누적 결과는 돌려준다
                if errored || incomplete {
                    break;
                }
            }

            local.cancel();
            acc.result()
        }
    })
}

/// 이후 백엔드의 `RespN_<path>` url 키를 N번째 파트의 데이터 트리에서
/// 찾아 파라미터로 채웁니다.
fn propagate_sequential_params(
    request: &mut Request,
    keys: &[String],
    parts: &[Option<Response>],
) {
    for key in keys {
        let Some(caps) = SEQUENTIAL_KEY_PATTERN.captures(key) else {
            continue;
        };
        let Some(index) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        let Some(path) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        let Some(Some(part)) = parts.get(index) else {
            continue;
        };
        if let Some(value) = walk_path(&part.data, path) {
            request.params.insert(key.clone(), value_to_param(value));
        }
    }
}

fn walk_path<'a>(data: &'a JsonObject, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 파트를 받는 순서대로 합치고 첫 오류를 고정하는 누적기
struct MergeAccumulator {
    total: usize,
    parts: Vec<Response>,
    error: Option<ProxyError>,
    combiner: ResponseCombiner,
}

impl MergeAccumulator {
    fn new(total: usize, combiner: ResponseCombiner) -> Self {
        Self {
            total,
            parts: Vec::with_capacity(total),
            error: None,
            combiner,
        }
    }

    fn merge(&mut self, response: Option<Response>, error: Option<ProxyError>) {
        if let Some(e) = error {
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
        if let Some(r) = response {
            self.parts.push(r);
        }
    }

    fn result(self) -> CallResult {
        let mut merged = (self.combiner)(self.total, self.parts);
        if self.error.is_some() {
            merged.is_complete = false;
        }
        CallResult::partial(Some(merged), self.error)
    }
}

/// 기본 병합 전략: 선언 순서의 재귀 deep-merge.
/// 양쪽이 객체인 키는 재귀하고 그 외에는 뒤의 값이 이깁니다.
/// 메타데이터는 첫 파트의 것을 유지합니다.
fn combine_data(total: usize, parts: Vec<Response>) -> Response {
    let mut is_complete = total == parts.len();
    let mut iter = parts.into_iter();
    let Some(mut merged) = iter.next() else {
        return Response::default();
    };
    is_complete = is_complete && merged.is_complete;

    for part in iter {
        is_complete = is_complete && part.is_complete;
        merged.data = deep_merge(std::mem::take(&mut merged.data), part.data);
    }

    merged.is_complete = is_complete;
    merged
}

fn deep_merge(mut base: JsonObject, later: JsonObject) -> JsonObject {
    for (key, value) in later {
        if let Value::Object(incoming) = value {
            if let Some(Value::Object(existing)) = base.get_mut(&key) {
                let merged = deep_merge(std::mem::take(existing), incoming);
                *existing = merged;
                continue;
            }
            base.insert(key, Value::Object(incoming));
        } else {
            base.insert(key, value);
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::Backend;

    fn dummy_proxy(data: Value, complete: bool) -> Proxy {
        from_fn(move |_ctx, _request| {
            let data = data.clone();
            async move {
                CallResult::success(Response {
                    data: data.as_object().cloned().unwrap_or_default(),
                    is_complete: complete,
                    ..Response::default()
                })
            }
        })
    }

    fn failing_proxy() -> Proxy {
        from_fn(|_ctx, _request| async {
            CallResult::failure(ProxyError::Transport("backend down".to_string()))
        })
    }

    fn endpoint_with_timeout() -> EndpointConfig {
        EndpointConfig {
            timeout: Duration::from_millis(500),
            ..EndpointConfig::default()
        }
    }

    fn sequential_endpoint(backends: Vec<Backend>) -> EndpointConfig {
        let mut endpoint = endpoint_with_timeout();
        endpoint.backend = backends;
        endpoint.extra_config.insert(
            super::super::NAMESPACE.to_string(),
            json!({ IS_SEQUENTIAL_KEY: true }),
        );
        endpoint
    }

    #[tokio::test]
    async fn test_parallel_merge_combines_parts() {
        let endpoint = endpoint_with_timeout();
        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"a": 1}), true),
                dummy_proxy(json!({"b": 2}), true),
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        assert!(result.error.is_none());
        let response = result.response.unwrap();
        assert!(response.is_complete);
        assert_eq!(Value::Object(response.data), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_parts() {
        let endpoint = endpoint_with_timeout();
        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![dummy_proxy(json!({"a": 1}), true), failing_proxy()],
        );

        let result = proxy(Context::background(), Request::default()).await;
        assert!(matches!(result.error, Some(ProxyError::Transport(_))));
        let response = result.response.unwrap();
        assert!(!response.is_complete);
        assert_eq!(Value::Object(response.data), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_incomplete_part_poisons_merged_completeness() {
        let endpoint = endpoint_with_timeout();
        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"a": 1}), true),
                dummy_proxy(json!({"b": 2}), false),
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        let response = result.response.unwrap();
        assert!(!response.is_complete);
        assert_eq!(Value::Object(response.data), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_deep_merge_recurses_and_later_wins() {
        let endpoint = endpoint_with_timeout();
        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"user": {"id": 1, "name": "a"}, "x": 1}), true),
                dummy_proxy(json!({"user": {"name": "b", "age": 3}, "x": 2}), true),
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        let response = result.response.unwrap();
        assert_eq!(
            Value::Object(response.data),
            json!({"user": {"id": 1, "name": "b", "age": 3}, "x": 2})
        );
    }

    #[tokio::test]
    async fn test_merged_metadata_comes_from_first_part() {
        let first = from_fn(|_ctx, _request| async {
            CallResult::success(Response {
                data: JsonObject::new(),
                is_complete: true,
                metadata: super::super::Metadata {
                    status_code: 201,
                    headers: Default::default(),
                },
                io: None,
            })
        });

        let endpoint = endpoint_with_timeout();
        let proxy =
            new_merge_data_middleware(&endpoint, vec![first, dummy_proxy(json!({}), true)]);

        let result = proxy(Context::background(), Request::default()).await;
        assert_eq!(result.response.unwrap().metadata.status_code, 201);
    }

    #[tokio::test]
    async fn test_sequential_merge_propagates_params() {
        let seen_params = Arc::new(Mutex::new(HashMap::new()));
        let seen_clone = Arc::clone(&seen_params);
        let second = from_fn(move |_ctx, request: Request| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock().unwrap() = request.params.clone();
                CallResult::success(Response {
                    data: json!({"second": true}).as_object().cloned().unwrap(),
                    is_complete: true,
                    ..Response::default()
                })
            }
        });

        let mut chained = Backend::default();
        chained.url_keys = vec!["Resp0_user.id".to_string()];
        let endpoint = sequential_endpoint(vec![Backend::default(), chained]);

        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"user": {"id": 42}}), true),
                second,
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        assert!(result.error.is_none());
        assert_eq!(
            seen_params.lock().unwrap().get("Resp0_user.id"),
            Some(&"42".to_string())
        );
    }

    #[tokio::test]
    async fn test_sequential_merge_aborts_on_error() {
        let called = Arc::new(Mutex::new(false));
        let called_clone = Arc::clone(&called);
        let second = from_fn(move |_ctx, _request| {
            let called = Arc::clone(&called_clone);
            async move {
                *called.lock().unwrap() = true;
                CallResult::success(Response::default())
            }
        });

        let endpoint = sequential_endpoint(vec![Backend::default(), Backend::default()]);
        let proxy = new_merge_data_middleware(&endpoint, vec![failing_proxy(), second]);

        let result = proxy(Context::background(), Request::default()).await;
        assert!(result.error.is_some());
        // 체인이 중단되어도 응답 형태는 유지된다
        assert!(result.response.is_some());
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_sequential_merge_aborts_on_incomplete() {
        let called = Arc::new(Mutex::new(false));
        let called_clone = Arc::clone(&called);
        let third = from_fn(move |_ctx, _request| {
            let called = Arc::clone(&called_clone);
            async move {
                *called.lock().unwrap() = true;
                CallResult::success(Response::default())
            }
        });

        let endpoint = sequential_endpoint(vec![
            Backend::default(),
            Backend::default(),
            Backend::default(),
        ]);
        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"a": 1}), true),
                dummy_proxy(json!({"b": 2}), false),
                third,
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        let response = result.response.unwrap();
        assert!(!response.is_complete);
        assert_eq!(Value::Object(response.data), json!({"a": 1, "b": 2}));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_custom_combiner_from_registry() {
        register_response_combiner(
            "last-wins-test",
            Arc::new(|_total, mut parts: Vec<Response>| {
                parts.pop().unwrap_or_default()
            }),
        );

        let mut endpoint = endpoint_with_timeout();
        endpoint.extra_config.insert(
            super::super::NAMESPACE.to_string(),
            json!({ MERGE_KEY: "last-wins-test" }),
        );

        let proxy = new_merge_data_middleware(
            &endpoint,
            vec![
                dummy_proxy(json!({"a": 1}), true),
                dummy_proxy(json!({"b": 2}), true),
            ],
        );

        let result = proxy(Context::background(), Request::default()).await;
        assert_eq!(
            Value::Object(result.response.unwrap().data),
            json!({"b": 2})
        );
    }
}
