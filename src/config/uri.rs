use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{ConfigError, RoutingPattern};

/// 엄격 REST 모드에서 엔드포인트 경로의 플레이스홀더를 찾는 패턴 (`/{name}`)
static ENDPOINT_URL_KEYS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\{([a-zA-Z\-_0-9]+)\}").expect("endpoint url keys pattern"));

/// 백엔드 URL 패턴과 비엄격 모드에서 쓰는 단순 플레이스홀더 패턴 (`{name}`)
static SIMPLE_URL_KEYS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z\-_0-9.]+)\}").expect("simple url keys pattern"));

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)?([a-zA-Z0-9._\-]+)(:[0-9]{2,6})?/?$").expect("host pattern")
});

pub fn clean_hosts(hosts: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut cleaned = Vec::with_capacity(hosts.len());
    for host in hosts {
        cleaned.push(clean_host(host)?);
    }
    Ok(cleaned)
}

/// 호스트 문자열을 `scheme://host[:port]` 형태로 정규화합니다.
/// 스킴이 없으면 `http://`를 기본으로 씁니다.
pub fn clean_host(host: &str) -> Result<String, ConfigError> {
    let captures = HOST_PATTERN
        .captures(host)
        .ok_or_else(|| ConfigError::InvalidHost(host.to_string()))?;

    let scheme = captures
        .get(1)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("http://");
    let name = captures
        .get(2)
        .ok_or_else(|| ConfigError::InvalidHost(host.to_string()))?
        .as_str();
    let port = captures.get(3).map(|m| m.as_str()).unwrap_or("");

    Ok(format!("{}{}{}", scheme, name, port))
}

pub fn clean_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// 라우터 어댑터가 쓸 수 있도록 엔드포인트 경로의 플레이스홀더 표기를
/// 변환합니다. Colon 패턴에서는 `{name}` → `:name`.
pub fn get_endpoint_path(path: &str, params: &[String], pattern: RoutingPattern) -> String {
    let mut result = path.to_string();
    if pattern == RoutingPattern::Colon {
        for param in params {
            let parts: Vec<&str> = result.splitn(2, '?').collect();
            let head = parts[0].replace(&format!("{{{}}}", param), &format!(":{}", param));
            result = if parts.len() > 1 {
                format!("{}?{}", head, parts[1])
            } else {
                head
            };
        }
    }
    result
}

/// 주어진 템플릿에서 플레이스홀더 이름들을 추출합니다.
pub fn extract_placeholders(subject: &str, strict_rest: bool) -> Vec<String> {
    let pattern: &Regex = if strict_rest {
        &ENDPOINT_URL_KEYS_PATTERN
    } else {
        &SIMPLE_URL_KEYS_PATTERN
    };
    pattern
        .captures_iter(subject)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn extract_simple_placeholders(subject: &str) -> Vec<String> {
    SIMPLE_URL_KEYS_PATTERN
        .captures_iter(subject)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
