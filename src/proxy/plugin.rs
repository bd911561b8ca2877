//! 프록시 플러그인 모듈
//!
//! 이름으로 등록된 요청/응답 수정자를 찾아 프록시를 감쌉니다. 요청
//! 수정자는 안쪽 프록시 호출 전에, 응답 수정자는 호출 후에 실행됩니다.
//! 등록되지 않은 이름은 무시합니다.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::config::{Backend, EndpointConfig, ExtraConfig};
use crate::register::Namespaced;

use super::{from_fn, CallResult, Context, Proxy, ProxyError, Request, Response};

/// 플러그인 선택자가 쓰는 확장 맵 네임스페이스
pub const PLUGIN_NAMESPACE: &str = "sonic/proxy/plugin";

const REQUEST_NAMESPACE: &str = "sonic/proxy/plugin/request";
const RESPONSE_NAMESPACE: &str = "sonic/proxy/plugin/response";

/// 요청 수정자. 수정된 요청을 돌려주거나 요청을 실패시킵니다.
pub type RequestModifier = Arc<dyn Fn(Request) -> Result<Request, ProxyError> + Send + Sync>;
/// 응답 수정자
pub type ResponseModifier = Arc<dyn Fn(Response) -> Result<Response, ProxyError> + Send + Sync>;

pub type RequestModifierFactory = Arc<dyn Fn(&ExtraConfig) -> RequestModifier + Send + Sync>;
pub type ResponseModifierFactory = Arc<dyn Fn(&ExtraConfig) -> ResponseModifier + Send + Sync>;

enum ModifierFactory {
    Request(RequestModifierFactory),
    Response(ResponseModifierFactory),
}

impl Clone for ModifierFactory {
    fn clone(&self) -> Self {
        match self {
            Self::Request(f) => Self::Request(f.clone()),
            Self::Response(f) => Self::Response(f.clone()),
        }
    }
}

static MODIFIER_REGISTER: Lazy<Namespaced<ModifierFactory>> = Lazy::new(Namespaced::new);

/// 요청 수정자 팩토리를 등록합니다.
pub fn register_request_modifier(name: &str, factory: RequestModifierFactory) {
    MODIFIER_REGISTER.register(REQUEST_NAMESPACE, name, ModifierFactory::Request(factory));
}

/// 응답 수정자 팩토리를 등록합니다.
pub fn register_response_modifier(name: &str, factory: ResponseModifierFactory) {
    MODIFIER_REGISTER.register(RESPONSE_NAMESPACE, name, ModifierFactory::Response(factory));
}

fn get_request_modifier(name: &str) -> Option<RequestModifierFactory> {
    match MODIFIER_REGISTER.get(REQUEST_NAMESPACE)?.get(name)? {
        ModifierFactory::Request(factory) => Some(factory),
        _ => None,
    }
}

fn get_response_modifier(name: &str) -> Option<ResponseModifierFactory> {
    match MODIFIER_REGISTER.get(RESPONSE_NAMESPACE)?.get(name)? {
        ModifierFactory::Response(factory) => Some(factory),
        _ => None,
    }
}

/// 엔드포인트 레벨 플러그인 미들웨어
pub fn new_plugin_middleware(endpoint: &EndpointConfig, next: Proxy) -> Proxy {
    new_plugin_middleware_from_extra(&endpoint.extra_config, next)
}

/// 백엔드 레벨 플러그인 미들웨어
pub fn new_backend_plugin_middleware(remote: &Backend, next: Proxy) -> Proxy {
    new_plugin_middleware_from_extra(&remote.extra_config, next)
}

fn new_plugin_middleware_from_extra(extra: &ExtraConfig, next: Proxy) -> Proxy {
    let Some(cfg) = extra.get(PLUGIN_NAMESPACE).and_then(|v| v.as_object()) else {
        return next;
    };

    let names = plugin_names(cfg.get("name"));
    if names.is_empty() {
        return next;
    }

    let mut request_modifiers: Vec<RequestModifier> = Vec::new();
    let mut response_modifiers: Vec<ResponseModifier> = Vec::new();

    for name in &names {
        if let Some(factory) = get_request_modifier(name) {
            request_modifiers.push(factory(cfg));
            continue;
        }
        if let Some(factory) = get_response_modifier(name) {
            response_modifiers.push(factory(cfg));
        }
        // 등록되지 않은 이름은 무시한다
    }

    if request_modifiers.is_empty() && response_modifiers.is_empty() {
        return next;
    }

    from_fn(move |ctx: Context, request: Request| {
        let next = next.clone();
        let request_modifiers = request_modifiers.clone();
        let response_modifiers = response_modifiers.clone();
        async move {
            let mut r = request;
            for modifier in &request_modifiers {
                r = match modifier(r) {
                    Ok(modified) => modified,
                    Err(e) => return CallResult::failure(e),
                };
            }

            let result = next(ctx, r).await;
            if result.error.is_some() {
                return result;
            }

            let Some(mut response) = result.response else {
                return result;
            };
            for modifier in &response_modifiers {
                response = match modifier(response) {
                    Ok(modified) => modified,
                    Err(e) => return CallResult::failure(e),
                };
            }
            CallResult::success(response)
        }
    })
}

/// `name` 키는 문자열 하나 또는 문자열 목록을 허용합니다.
fn plugin_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(|n| n.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}
