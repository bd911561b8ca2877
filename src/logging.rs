use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// 전역 tracing 구독자를 초기화합니다.
///
/// `RUST_LOG` 환경 변수를 존중하되 기본 레벨은 INFO, 이 크레이트는
/// DEBUG로 둡니다. 테스트처럼 이미 구독자가 있는 환경에서는 조용히
/// 아무것도 하지 않습니다.
pub fn init_logging() {
    let filter = EnvFilter::from_default_env()
        .add_directive(Level::INFO.into())
        .add_directive(
            "sonic_gateway=debug"
                .parse()
                .unwrap_or_else(|_| Level::DEBUG.into()),
        );

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
