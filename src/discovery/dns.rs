//! DNS SRV 기반 서비스 디스커버리
//!
//! 생성 시 SRV 레코드를 해석해 `http://host:port` 스냅샷을 만들고
//! (weight만큼 복제), TTL 주기로 백그라운드에서 갱신합니다.
//! 조회 실패 시 마지막 정상 스냅샷을 유지합니다.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{DiscoveryError, Subscriber};

pub const NAMESPACE: &str = "dns";

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SrvRecord {
    pub target: String,
    pub port: u16,
    pub weight: u16,
}

/// SRV 레코드 조회 구현. 임베더가 실제 리졸버를 주입하고
/// 테스트는 페이크를 씁니다.
#[async_trait]
pub trait SrvLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Vec<SrvRecord>, DiscoveryError>;
}

/// `dns` 디스커버리 태그에 대한 서브스크라이버 팩토리를 등록합니다.
/// 백엔드 호스트 목록의 첫 항목을 SRV 조회 이름으로 씁니다.
pub fn register(lookup: Arc<dyn SrvLookup>) {
    super::register_subscriber_factory(
        NAMESPACE,
        Arc::new(move |backend: &crate::config::Backend| {
            let name = backend.host.first().cloned().unwrap_or_default();
            DnsSubscriber::new(&name, Arc::clone(&lookup)) as Arc<dyn Subscriber>
        }),
    );
}

pub struct DnsSubscriber {
    cache: Arc<Mutex<Vec<String>>>,
}

impl DnsSubscriber {
    pub fn new(name: &str, lookup: Arc<dyn SrvLookup>) -> Arc<Self> {
        Self::new_detailed(name, lookup, DEFAULT_TTL)
    }

    /// 최초 해석을 수행한 뒤 TTL 주기의 갱신 루프를 백그라운드 태스크로
    /// 띄웁니다. 루프는 프로세스 수명 동안 돕니다.
    pub fn new_detailed(name: &str, lookup: Arc<dyn SrvLookup>, ttl: Duration) -> Arc<Self> {
        let subscriber = Arc::new(Self {
            cache: Arc::new(Mutex::new(Vec::new())),
        });

        let cache = Arc::clone(&subscriber.cache);
        let name = name.to_string();
        tokio::spawn(async move {
            update(&name, lookup.as_ref(), &cache).await;
            loop {
                tokio::time::sleep(ttl).await;
                update(&name, lookup.as_ref(), &cache).await;
            }
        });

        subscriber
    }
}

impl Subscriber for DnsSubscriber {
    fn hosts(&self) -> Result<Vec<String>, DiscoveryError> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cache.clone())
    }
}

async fn update(name: &str, lookup: &dyn SrvLookup, cache: &Mutex<Vec<String>>) {
    let records = match lookup.lookup(name).await {
        Ok(records) => records,
        Err(e) => {
            // 조회 실패는 마지막 정상 스냅샷을 건드리지 않는다
            warn!(service = %name, error = %e, "SRV 조회 실패, 기존 스냅샷 유지");
            return;
        }
    };

    let instances = resolve_instances(records);
    let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
    *guard = instances;
}

fn resolve_instances(records: Vec<SrvRecord>) -> Vec<String> {
    let mut instances = Vec::new();
    for record in records {
        let instance = format!("http://{}:{}", record.target, record.port);
        let copies = record.weight.max(1) as usize;
        for _ in 0..copies {
            instances.push(instance.clone());
        }
    }
    instances
}
