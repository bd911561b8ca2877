use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;

use super::{DiscoveryError, Subscriber};

/// 서브스크라이버의 현재 스냅샷에서 호출마다 호스트 하나를 고르는 정책
pub trait Balancer: Send + Sync {
    fn host(&self) -> Result<String, DiscoveryError>;
}

/// 런타임 병렬성에 따라 라운드 로빈 또는 랜덤 밸런서를 고릅니다.
pub fn new_balancer(subscriber: Arc<dyn Subscriber>) -> Arc<dyn Balancer> {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if parallelism == 1 {
        new_round_robin_lb(subscriber)
    } else {
        new_random_lb(subscriber)
    }
}

pub fn new_round_robin_lb(subscriber: Arc<dyn Subscriber>) -> Arc<dyn Balancer> {
    let mut start = 0u64;
    if let Some(hosts) = subscriber.fixed_hosts() {
        match hosts.len() {
            1 => return Arc::new(NopBalancer(hosts[0].clone())),
            0 => {}
            // 여러 워커 프로세스가 같은 순서로 돌지 않도록 시작점을 흩뿌린다
            len => start = rand::thread_rng().gen_range(0..len as u64),
        }
    }
    Arc::new(RoundRobin {
        subscriber,
        counter: AtomicU64::new(start),
    })
}

pub fn new_random_lb(subscriber: Arc<dyn Subscriber>) -> Arc<dyn Balancer> {
    if let Some(hosts) = subscriber.fixed_hosts() {
        if hosts.len() == 1 {
            return Arc::new(NopBalancer(hosts[0].clone()));
        }
    }
    Arc::new(Random { subscriber })
}

struct RoundRobin {
    subscriber: Arc<dyn Subscriber>,
    counter: AtomicU64,
}

impl Balancer for RoundRobin {
    fn host(&self) -> Result<String, DiscoveryError> {
        let hosts = non_empty_hosts(self.subscriber.as_ref())?;
        let offset = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len() as u64;
        Ok(hosts[offset as usize].clone())
    }
}

struct Random {
    subscriber: Arc<dyn Subscriber>,
}

impl Balancer for Random {
    fn host(&self) -> Result<String, DiscoveryError> {
        let hosts = non_empty_hosts(self.subscriber.as_ref())?;
        let index = rand::thread_rng().gen_range(0..hosts.len());
        Ok(hosts[index].clone())
    }
}

/// 단일 고정 호스트 전용 상수 밸런서
struct NopBalancer(String);

impl Balancer for NopBalancer {
    fn host(&self) -> Result<String, DiscoveryError> {
        Ok(self.0.clone())
    }
}

fn non_empty_hosts(subscriber: &dyn Subscriber) -> Result<Vec<String>, DiscoveryError> {
    let hosts = subscriber.hosts()?;
    if hosts.is_empty() {
        return Err(DiscoveryError::NoHosts);
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FixedSubscriber;
    use std::collections::HashMap;

    #[test]
    fn test_round_robin_is_fair_over_window() {
        let hosts: Vec<String> = (0..4).map(|i| format!("http://host{}", i)).collect();
        let balancer = new_round_robin_lb(Arc::new(FixedSubscriber::from(hosts.clone())));

        let k = 25;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..k * hosts.len() {
            *counts.entry(balancer.host().unwrap()).or_default() += 1;
        }

        for host in &hosts {
            assert_eq!(counts[host], k, "host {} was not selected exactly {} times", host, k);
        }
    }

    #[test]
    fn test_round_robin_single_host_short_circuit() {
        let balancer =
            new_round_robin_lb(Arc::new(FixedSubscriber::from(vec!["http://only".to_string()])));
        for _ in 0..10 {
            assert_eq!(balancer.host().unwrap(), "http://only");
        }
    }

    #[test]
    fn test_random_stays_in_snapshot() {
        let hosts: Vec<String> = (0..3).map(|i| format!("http://host{}", i)).collect();
        let balancer = new_random_lb(Arc::new(FixedSubscriber::from(hosts.clone())));

        for _ in 0..100 {
            let host = balancer.host().unwrap();
            assert!(hosts.contains(&host));
        }
    }

    #[test]
    fn test_empty_snapshot_fails_with_no_hosts() {
        let round_robin = new_round_robin_lb(Arc::new(FixedSubscriber::default()));
        assert_eq!(round_robin.host(), Err(DiscoveryError::NoHosts));

        let random = new_random_lb(Arc::new(FixedSubscriber::default()));
        assert_eq!(random.host(), Err(DiscoveryError::NoHosts));
    }

    #[test]
    fn test_subscriber_error_propagates() {
        struct Failing;
        impl Subscriber for Failing {
            fn hosts(&self) -> Result<Vec<String>, DiscoveryError> {
                Err(DiscoveryError::Lookup("boom".to_string()))
            }
        }

        let balancer = new_round_robin_lb(Arc::new(Failing));
        assert_eq!(
            balancer.host(),
            Err(DiscoveryError::Lookup("boom".to_string()))
        );
    }
}
