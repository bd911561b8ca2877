use std::collections::HashMap;

use bytes::Bytes;
use url::Url;

/// 파이프라인을 흐르는 요청.
///
/// 백엔드 호출마다 복제되므로 병렬 태스크가 가변 상태를 공유하지
/// 않습니다. 바디는 버퍼링된 바이트라 복제본 재생이 공짜입니다.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub url: Option<Url>,
    pub query: HashMap<String, Vec<String>>,
    pub path: String,
    pub body: Option<Bytes>,
    /// 경로 플레이스홀더 → 값 (정규화된 대문자 키)
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, Vec<String>>,
}

impl Request {
    /// 백엔드의 정규화된 URL 템플릿에 파라미터를 치환해 path를 만듭니다.
    pub fn generate_path(&mut self, url_pattern: &str) {
        if self.params.is_empty() {
            self.path = url_pattern.to_string();
            return;
        }
        let mut buff = url_pattern.to_string();
        for (key, value) in &self.params {
            buff = buff.replace(&format!("{{{{.{}}}}}", key), value);
        }
        self.path = buff;
    }
}
