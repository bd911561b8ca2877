//! 섀도 백엔드
//!
//! `shadow = true`로 표시된 백엔드는 본 파이프라인과 나란히
//! fire-and-forget으로 호출됩니다. 결과는 버려지고, 취소 계보가 끊긴
//! 컨텍스트(값 조회는 유지)와 깊이 복제된 요청을 받습니다.

use tracing::debug;

use crate::config::EndpointConfig;

use super::factory::Factory;
use super::{from_fn, Context, Proxy, ProxyError, Request};

const SHADOW_KEY: &str = "shadow";

fn is_shadow_backend(extra: &crate::config::ExtraConfig) -> bool {
    extra
        .get(super::NAMESPACE)
        .and_then(|v| v.as_object())
        .and_then(|cfg| cfg.get(SHADOW_KEY))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// 섀도 백엔드를 본 파이프라인에서 분리하는 팩토리 래퍼
pub struct ShadowFactory<F: Factory> {
    inner: F,
}

pub fn new_shadow_factory<F: Factory>(factory: F) -> ShadowFactory<F> {
    ShadowFactory { inner: factory }
}

impl<F: Factory> Factory for ShadowFactory<F> {
    fn new_proxy(&self, cfg: &EndpointConfig) -> Result<Proxy, ProxyError> {
        if cfg.backend.is_empty() {
            return Err(ProxyError::NoBackends);
        }

        let mut regular = cfg.clone();
        let mut shadow = cfg.clone();
        regular.backend.retain(|b| !is_shadow_backend(&b.extra_config));
        shadow.backend.retain(|b| is_shadow_backend(&b.extra_config));

        let proxy = self.inner.new_proxy(&regular)?;

        if shadow.backend.is_empty() {
            return Ok(proxy);
        }

        debug!(
            endpoint = %cfg.endpoint,
            shadow_backends = shadow.backend.len(),
            "섀도 백엔드 분리"
        );
        let shadow_proxy = self.inner.new_proxy(&shadow)?;
        Ok(new_shadow_proxy(proxy, shadow_proxy))
    }
}

/// p2를 fire-and-forget으로 호출하고 p1의 결과만 돌려주는 프록시
pub fn new_shadow_proxy(p1: Proxy, p2: Proxy) -> Proxy {
    from_fn(move |ctx: Context, request: Request| {
        let p1 = p1.clone();
        let p2 = p2.clone();
        async move {
            let detached = ctx.detached();
            let shadow_request = request.clone();
            tokio::spawn(async move {
                let _ = p2(detached, shadow_request).await;
            });

            p1(ctx, request).await
        }
    })
}
