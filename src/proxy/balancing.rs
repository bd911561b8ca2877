use std::sync::Arc;

use url::Url;

use crate::config::Backend;
use crate::discovery::balancer::{new_balancer, Balancer};
use crate::discovery::{get_subscriber, Subscriber};

use super::{from_fn, CallResult, Context, Proxy, Request};

/// 백엔드의 디스커버리 태그로 서브스크라이버를 찾아 로드 밸런싱
/// 미들웨어를 만듭니다.
pub fn new_load_balanced_middleware(remote: &Backend, next: Proxy) -> Proxy {
    new_load_balanced_middleware_with_subscriber(get_subscriber(remote), next)
}

pub fn new_load_balanced_middleware_with_subscriber(
    subscriber: Arc<dyn Subscriber>,
    next: Proxy,
) -> Proxy {
    new_load_balanced(new_balancer(subscriber), next)
}

/// 밸런서에서 호스트를 골라 호스트+경로로 URL을 만들고, 기존 쿼리 값을
/// URL 쿼리 스트링에 병합한 뒤 전달합니다.
fn new_load_balanced(lb: Arc<dyn Balancer>, next: Proxy) -> Proxy {
    from_fn(move |ctx: Context, request: Request| {
        let lb = lb.clone();
        let next = next.clone();
        async move {
            let host = match lb.host() {
                Ok(host) => host,
                Err(e) => return CallResult::failure(e.into()),
            };

            let mut r = request;
            let raw = format!("{}{}", host, r.path);
            let mut url = match Url::parse(&raw) {
                Ok(url) => url,
                Err(e) => return CallResult::failure(e.into()),
            };

            if !r.query.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, values) in &r.query {
                    for value in values {
                        pairs.append_pair(key, value);
                    }
                }
                drop(pairs);
            }
            r.url = Some(url);

            next(ctx, r).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FixedSubscriber;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::super::Response;

    fn capture_proxy(seen: Arc<Mutex<Option<Request>>>) -> Proxy {
        from_fn(move |_ctx, request: Request| {
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock().unwrap() = Some(request);
                CallResult::success(Response {
                    is_complete: true,
                    ..Response::default()
                })
            }
        })
    }

    #[tokio::test]
    async fn test_host_and_path_are_joined() {
        let seen = Arc::new(Mutex::new(None));
        let proxy = new_load_balanced_middleware_with_subscriber(
            Arc::new(FixedSubscriber::from(vec![
                "http://upstream:8000".to_string()
            ])),
            capture_proxy(Arc::clone(&seen)),
        );

        let request = Request {
            path: "/users/42".to_string(),
            ..Request::default()
        };
        proxy(Context::background(), request).await;

        let forwarded = seen.lock().unwrap().take().unwrap();
        assert_eq!(
            forwarded.url.unwrap().as_str(),
            "http://upstream:8000/users/42"
        );
    }

    #[tokio::test]
    async fn test_query_values_are_merged() {
        let seen = Arc::new(Mutex::new(None));
        let proxy = new_load_balanced_middleware_with_subscriber(
            Arc::new(FixedSubscriber::from(vec![
                "http://upstream:8000".to_string()
            ])),
            capture_proxy(Arc::clone(&seen)),
        );

        let request = Request {
            path: "/search?fixed=1".to_string(),
            query: HashMap::from([("q".to_string(), vec!["rust".to_string()])]),
            ..Request::default()
        };
        proxy(Context::background(), request).await;

        let forwarded = seen.lock().unwrap().take().unwrap();
        let url = forwarded.url.unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("fixed=1"));
        assert!(query.contains("q=rust"));
    }

    #[tokio::test]
    async fn test_empty_host_set_fails() {
        let proxy = new_load_balanced_middleware_with_subscriber(
            Arc::new(FixedSubscriber::default()),
            capture_proxy(Arc::new(Mutex::new(None))),
        );

        let result = proxy(Context::background(), Request::default()).await;
        assert!(result.response.is_none());
        assert_eq!(
            result.error.unwrap().to_string(),
            "no hosts available"
        );
    }

    #[tokio::test]
    async fn test_unknown_discovery_tag_falls_back_to_backend_hosts() {
        let seen = Arc::new(Mutex::new(None));
        let backend = Backend {
            sd: "never-registered".to_string(),
            host: vec!["http://static-host:9000".to_string()],
            ..Backend::default()
        };
        let proxy = new_load_balanced_middleware(&backend, capture_proxy(Arc::clone(&seen)));

        let request = Request {
            path: "/x".to_string(),
            ..Request::default()
        };
        proxy(Context::background(), request).await;

        let forwarded = seen.lock().unwrap().take().unwrap();
        assert_eq!(
            forwarded.url.unwrap().as_str(),
            "http://static-host:9000/x"
        );
    }
}
