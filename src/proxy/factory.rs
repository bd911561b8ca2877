use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::discovery::{get_subscriber, Subscriber};

use super::balancing::new_load_balanced_middleware_with_subscriber;
use super::concurrent::new_concurrent_middleware;
use super::flatmap::new_flatmap_middleware;
use super::graphql::new_graphql_middleware;
use super::http::{default_http_request_executor, http_proxy_factory, BackendProxyFactory};
use super::merging::new_merge_data_middleware;
use super::plugin::{new_backend_plugin_middleware, new_plugin_middleware};
use super::static_data::new_static_middleware;
use super::{Proxy, ProxyError};

pub use super::http::BackendProxyFactory as BackendFactory;

/// 엔드포인트 설정에서 프록시를 만드는 팩토리
pub trait Factory: Send + Sync {
    fn new_proxy(&self, cfg: &EndpointConfig) -> Result<Proxy, ProxyError>;
}

type SubscriberFactoryFn =
    Arc<dyn Fn(&crate::config::Backend) -> Arc<dyn Subscriber> + Send + Sync>;

/// 기본 팩토리. 백엔드마다
/// `RequestBuilder → Concurrent → LoadBalanced → GraphQL → BackendPlugin →
/// HTTPBackend` 스택을 쌓고, 엔드포인트 레벨에서 MergeData/Flatmap/Plugin/
/// Static으로 감쌉니다.
pub struct DefaultFactory {
    backend_factory: BackendProxyFactory,
    subscriber_factory: SubscriberFactoryFn,
}

/// 기본 HTTP 실행기와 전역 디스커버리 레지스트리를 쓰는 팩토리
pub fn default_factory() -> DefaultFactory {
    new_default_factory(http_proxy_factory(default_http_request_executor()))
}

pub fn new_default_factory(backend_factory: BackendProxyFactory) -> DefaultFactory {
    DefaultFactory {
        backend_factory,
        subscriber_factory: Arc::new(|backend| get_subscriber(backend)),
    }
}

impl DefaultFactory {
    pub fn with_subscriber_factory(mut self, subscriber_factory: SubscriberFactoryFn) -> Self {
        self.subscriber_factory = subscriber_factory;
        self
    }

    fn new_single(&self, cfg: &EndpointConfig) -> Proxy {
        self.new_stack(&cfg.backend[0])
    }

    fn new_multi(&self, cfg: &EndpointConfig) -> Proxy {
        let backend_proxies: Vec<Proxy> =
            cfg.backend.iter().map(|b| self.new_stack(b)).collect();
        let proxy = new_merge_data_middleware(cfg, backend_proxies);
        new_flatmap_middleware(cfg, proxy)
    }

    fn new_stack(&self, backend: &crate::config::Backend) -> Proxy {
        let mut proxy = (self.backend_factory)(backend);
        proxy = new_backend_plugin_middleware(backend, proxy);
        proxy = new_graphql_middleware(backend, proxy);
        proxy = new_load_balanced_middleware_with_subscriber(
            (self.subscriber_factory)(backend),
            proxy,
        );
        if backend.concurrent_calls > 1 {
            proxy = new_concurrent_middleware(backend, proxy);
        }
        super::http::new_request_builder_middleware(backend, proxy)
    }
}

impl Factory for DefaultFactory {
    fn new_proxy(&self, cfg: &EndpointConfig) -> Result<Proxy, ProxyError> {
        let proxy = match cfg.backend.len() {
            0 => return Err(ProxyError::NoBackends),
            1 => self.new_single(cfg),
            _ => self.new_multi(cfg),
        };

        let proxy = new_plugin_middleware(cfg, proxy);
        Ok(new_static_middleware(cfg, proxy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::config::{Backend, ServiceConfig, CONFIG_VERSION};
    use crate::discovery::FixedSubscriber;

    use super::super::status::backend_response_from_bytes;
    use super::super::{Context, HttpRequestExecutor, Request};

    /// 경로별로 준비된 JSON을 돌려주는 페이크 실행기
    fn table_executor(table: HashMap<String, &'static str>) -> HttpRequestExecutor {
        Arc::new(move |_ctx, req| {
            let body = table
                .get(req.uri().path())
                .copied()
                .unwrap_or("{}");
            Box::pin(async move {
                Ok(backend_response_from_bytes(
                    StatusCode::OK,
                    vec![],
                    Bytes::from_static(body.as_bytes()),
                ))
            })
        })
    }

    fn test_factory(table: HashMap<String, &'static str>) -> DefaultFactory {
        new_default_factory(http_proxy_factory(table_executor(table))).with_subscriber_factory(
            Arc::new(|backend: &Backend| {
                Arc::new(FixedSubscriber::from(backend.host.clone())) as Arc<dyn Subscriber>
            }),
        )
    }

    fn init_config(endpoint_path: &str, backends: Vec<Backend>) -> ServiceConfig {
        let mut cfg = ServiceConfig {
            version: CONFIG_VERSION,
            host: vec!["http://upstream".to_string()],
            timeout: Duration::from_millis(500),
            endpoints: vec![EndpointConfig {
                endpoint: endpoint_path.to_string(),
                backend: backends,
                ..EndpointConfig::default()
            }],
            ..ServiceConfig::default()
        };
        cfg.init().unwrap();
        cfg
    }

    #[tokio::test]
    async fn test_factory_rejects_zero_backends() {
        let factory = test_factory(HashMap::new());
        let endpoint = EndpointConfig::default();
        assert!(matches!(
            factory.new_proxy(&endpoint),
            Err(ProxyError::NoBackends)
        ));
    }

    #[tokio::test]
    async fn test_single_backend_stack_end_to_end() {
        let cfg = init_config(
            "/users/{user}",
            vec![Backend {
                url_pattern: "/users/{user}".to_string(),
                ..Backend::default()
            }],
        );

        let factory = test_factory(HashMap::from([(
            "/users/42".to_string(),
            r#"{"name": "kim"}"#,
        )]));
        let proxy = factory.new_proxy(&cfg.endpoints[0]).unwrap();

        let request = Request {
            method: "GET".to_string(),
            params: HashMap::from([("User".to_string(), "42".to_string())]),
            ..Request::default()
        };
        let result = proxy(Context::background(), request).await;

        assert!(result.error.is_none());
        let response = result.response.unwrap();
        assert!(response.is_complete);
        assert_eq!(response.data.get("name"), Some(&json!("kim")));
    }

    #[tokio::test]
    async fn test_multi_backend_merge_end_to_end() {
        let cfg = init_config(
            "/aggregate",
            vec![
                Backend {
                    url_pattern: "/a".to_string(),
                    ..Backend::default()
                },
                Backend {
                    url_pattern: "/b".to_string(),
                    ..Backend::default()
                },
            ],
        );

        let factory = test_factory(HashMap::from([
            ("/a".to_string(), r#"{"a": 1}"#),
            ("/b".to_string(), r#"{"b": 2}"#),
        ]));
        let proxy = factory.new_proxy(&cfg.endpoints[0]).unwrap();

        let request = Request {
            method: "GET".to_string(),
            ..Request::default()
        };
        let result = proxy(Context::background(), request).await;

        let response = result.response.unwrap();
        assert!(response.is_complete);
        assert_eq!(
            serde_json::Value::Object(response.data),
            json!({"a": 1, "b": 2})
        );
    }
}
