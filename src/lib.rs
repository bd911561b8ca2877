//! Sonic Gateway는 선언적 설정으로 인바운드 엔드포인트와 아웃바운드 백엔드를
//! 연결하는 API 게이트웨이 코어입니다.
//!
//! # 주요 기능
//!
//! - 설정 정규화 (엔드포인트/백엔드 불변 모델)
//! - 서비스 디스커버리 + 로드 밸런싱
//! - 백엔드 fan-out, 응답 병합, 부분 실패 전파
//! - 엔티티 포매터 (allow/deny/mapping/group/flatmap)
//!
//! # 예제
//!
//! ```
//! use sonic_gateway::discovery::{FixedSubscriber, Subscriber};
//! use sonic_gateway::discovery::balancer::{new_round_robin_lb, Balancer};
//! use std::sync::Arc;
//!
//! let subscriber = Arc::new(FixedSubscriber::from(vec![
//!     "http://127.0.0.1:8080".to_string(),
//!     "http://127.0.0.1:8081".to_string(),
//! ]));
//!
//! let balancer = new_round_robin_lb(subscriber);
//! let host = balancer.host().unwrap();
//! assert!(host.starts_with("http://127.0.0.1:808"));
//! ```
//!
//! # 파이프라인 구성
//!
//! 엔드포인트 하나는 `RequestBuilder → Concurrent → LoadBalanced → GraphQL →
//! BackendPlugin → HTTPBackend` 스택을 백엔드마다 하나씩 가지며, 여러 백엔드의
//! 응답은 `MergeData`에서 합쳐진 뒤 `Flatmap → Plugin → Static` 순서로
//! 엔드포인트 레벨 미들웨어를 거칩니다.

pub mod config;
pub mod discovery;
pub mod encoding;
pub mod logging;
pub mod proxy;
pub mod register;
pub mod route;
