//! 정적 데이터 주입 미들웨어
//!
//! 확장 맵의 `static` 설정에 따라 리터럴 데이터 맵을 응답에 주입합니다.
//! 전략이 일치할 때 정적 맵의 키가 기존 값을 덮어씁니다.

use crate::config::EndpointConfig;

use super::{from_fn, CallResult, Context, JsonObject, Proxy, ProxyError, Request, Response};

const STATIC_KEY: &str = "static";

const ALWAYS_STRATEGY: &str = "always";
const IF_SUCCESS_STRATEGY: &str = "success";
const IF_ERRORED_STRATEGY: &str = "errored";
const IF_COMPLETE_STRATEGY: &str = "complete";
const IF_INCOMPLETE_STRATEGY: &str = "incomplete";

#[derive(Debug, Clone)]
struct StaticConfig {
    data: JsonObject,
    strategy: String,
}

impl StaticConfig {
    fn matches(&self, response: &Option<Response>, error: &Option<ProxyError>) -> bool {
        match self.strategy.as_str() {
            IF_SUCCESS_STRATEGY => error.is_none(),
            IF_ERRORED_STRATEGY => error.is_some(),
            IF_COMPLETE_STRATEGY => {
                error.is_none()
                    && response.as_ref().map(|r| r.is_complete).unwrap_or(false)
            }
            IF_INCOMPLETE_STRATEGY => {
                response.as_ref().map(|r| !r.is_complete).unwrap_or(true)
            }
            _ => true,
        }
    }
}

fn get_static_config(endpoint: &EndpointConfig) -> Option<StaticConfig> {
    let cfg = endpoint
        .extra_config
        .get(super::NAMESPACE)?
        .as_object()?
        .get(STATIC_KEY)?
        .as_object()?;

    let data = cfg.get("data")?.as_object()?.clone();
    let strategy = cfg
        .get("strategy")
        .and_then(|v| v.as_str())
        .unwrap_or(ALWAYS_STRATEGY)
        .to_string();

    Some(StaticConfig { data, strategy })
}

pub fn new_static_middleware(endpoint: &EndpointConfig, next: Proxy) -> Proxy {
    let Some(cfg) = get_static_config(endpoint) else {
        return next;
    };

    from_fn(move |ctx: Context, request: Request| {
        let next = next.clone();
        let cfg = cfg.clone();
        async move {
            let result = next(ctx, request).await;
            if !cfg.matches(&result.response, &result.error) {
                return result;
            }

            let mut response = result.response.unwrap_or_default();
            for (key, value) in &cfg.data {
                response.data.insert(key.clone(), value.clone());
            }

            CallResult::partial(Some(response), result.error)
        }
    })
}
