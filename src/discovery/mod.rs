//! 서비스 디스커버리 모듈
//!
//! 백엔드의 디스커버리 태그로 서브스크라이버를 찾고, 밸런서가 그 스냅샷에서
//! 호스트를 하나씩 골라냅니다. 알 수 없는 태그는 오류가 아니라 고정 호스트
//! 목록으로 폴백합니다.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::Backend;
use crate::register::Untyped;

pub mod balancer;
pub mod dns;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// 스냅샷이 비어 있을 때 밸런서가 공유하는 센티널
    NoHosts,
    Lookup(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHosts => write!(f, "no hosts available"),
            Self::Lookup(msg) => write!(f, "discovery lookup error: {}", msg),
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// 업스트림 서비스 호스트 집합의 현재 스냅샷
pub trait Subscriber: Send + Sync {
    fn hosts(&self) -> Result<Vec<String>, DiscoveryError>;

    /// 고정 호스트 목록 기반 서브스크라이버만 스냅샷을 정적으로 노출합니다.
    /// 밸런서가 단일 호스트 최적화에 사용합니다.
    fn fixed_hosts(&self) -> Option<&[String]> {
        None
    }
}

/// 정적 호스트 목록 서브스크라이버
#[derive(Debug, Clone, Default)]
pub struct FixedSubscriber(pub Vec<String>);

impl From<Vec<String>> for FixedSubscriber {
    fn from(hosts: Vec<String>) -> Self {
        Self(hosts)
    }
}

impl Subscriber for FixedSubscriber {
    fn hosts(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.0.clone())
    }

    fn fixed_hosts(&self) -> Option<&[String]> {
        Some(&self.0)
    }
}

/// 백엔드 설정에서 서브스크라이버를 만드는 팩토리
pub type SubscriberFactory = Arc<dyn Fn(&Backend) -> Arc<dyn Subscriber> + Send + Sync>;

static SUBSCRIBER_FACTORIES: Lazy<Untyped<SubscriberFactory>> = Lazy::new(Untyped::new);

pub fn register_subscriber_factory(name: &str, factory: SubscriberFactory) {
    SUBSCRIBER_FACTORIES.register(name, factory);
}

/// 백엔드의 디스커버리 태그로 서브스크라이버를 얻습니다.
/// 태그가 등록되어 있지 않으면 백엔드의 정적 호스트 목록으로 폴백합니다.
pub fn get_subscriber(backend: &Backend) -> Arc<dyn Subscriber> {
    match SUBSCRIBER_FACTORIES.get(&backend.sd) {
        Some(factory) => factory(backend),
        None => Arc::new(FixedSubscriber(backend.host.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_subscriber_hosts() {
        let subscriber = FixedSubscriber::from(vec!["http://a".to_string()]);
        assert_eq!(subscriber.hosts().unwrap(), vec!["http://a"]);
        assert_eq!(subscriber.fixed_hosts(), Some(&["http://a".to_string()][..]));
    }

    #[test]
    fn test_unknown_tag_falls_back_to_fixed() {
        let backend = Backend {
            sd: "unregistered-discovery".to_string(),
            host: vec!["http://fallback:80".to_string()],
            ..Backend::default()
        };

        let subscriber = get_subscriber(&backend);
        assert_eq!(subscriber.hosts().unwrap(), vec!["http://fallback:80"]);
    }

    #[test]
    fn test_registered_factory_is_used() {
        register_subscriber_factory(
            "static-test",
            Arc::new(|_backend: &Backend| {
                Arc::new(FixedSubscriber::from(vec!["http://custom:1234".to_string()]))
                    as Arc<dyn Subscriber>
            }),
        );

        let backend = Backend {
            sd: "static-test".to_string(),
            host: vec!["http://ignored".to_string()],
            ..Backend::default()
        };

        let subscriber = get_subscriber(&backend);
        assert_eq!(subscriber.hosts().unwrap(), vec!["http://custom:1234"]);
    }
}
