//! 라우터 지원 모듈
//!
//! 구체 라우터 어댑터들이 공유하는 도우미입니다. 어댑터는 인바운드 HTTP
//! 요청을 파이프라인의 `Request`로 바꾸고 `Response`를 렌더링하는 일만
//! 합니다.

use std::collections::HashMap;

use crate::config::EndpointConfig;
use crate::proxy;

/// 응답 완전성을 클라이언트에 알리는 헤더
pub const COMPLETE_RESPONSE_HEADER: &str = "X-Sonic-Completed";

/// 쿼리 값을 엔드포인트의 allow-list로 거릅니다. `*`는 전체 통과입니다.
pub fn filter_query(
    allowed: &[String],
    query: HashMap<String, Vec<String>>,
) -> HashMap<String, Vec<String>> {
    if allowed.iter().any(|k| k == "*") {
        return query;
    }
    query
        .into_iter()
        .filter(|(key, _)| allowed.iter().any(|k| k == key))
        .collect()
}

/// 헤더를 `headers_to_pass`로 거르고 포워딩 헤더를 주입합니다.
pub fn filter_headers(
    headers_to_pass: &[String],
    headers: &HashMap<String, Vec<String>>,
    client_ip: &str,
    host: &str,
    user_agent: &str,
) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = headers
        .iter()
        .filter(|(key, _)| headers_to_pass.iter().any(|k| k.eq_ignore_ascii_case(key)))
        .map(|(key, values)| (key.clone(), values.clone()))
        .collect();

    if !client_ip.is_empty() {
        out.entry("X-Forwarded-For".to_string())
            .or_default()
            .push(client_ip.to_string());
    }
    if !host.is_empty() {
        out.insert("X-Forwarded-Host".to_string(), vec![host.to_string()]);
    }
    if !user_agent.is_empty() {
        out.entry("User-Agent".to_string())
            .or_insert_with(|| vec![user_agent.to_string()]);
    }
    out
}

/// 순차 엔드포인트 검증: 마지막이 아닌 백엔드는 모두 GET이어야 합니다.
pub fn is_valid_sequential_endpoint(endpoint: &EndpointConfig) -> bool {
    let sequential = endpoint
        .extra_config
        .get(proxy::NAMESPACE)
        .and_then(|v| v.as_object())
        .and_then(|cfg| cfg.get("sequential"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !sequential {
        return false;
    }

    let total = endpoint.backend.len();
    endpoint
        .backend
        .iter()
        .enumerate()
        .all(|(i, backend)| backend.method == "GET" || i + 1 == total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::Backend;

    #[test]
    fn test_filter_query_allow_list() {
        let query = HashMap::from([
            ("page".to_string(), vec!["1".to_string()]),
            ("secret".to_string(), vec!["x".to_string()]),
        ]);
        let filtered = filter_query(&["page".to_string()], query);
        assert!(filtered.contains_key("page"));
        assert!(!filtered.contains_key("secret"));
    }

    #[test]
    fn test_filter_query_wildcard_passes_everything() {
        let query = HashMap::from([
            ("a".to_string(), vec!["1".to_string()]),
            ("b".to_string(), vec!["2".to_string()]),
        ]);
        let filtered = filter_query(&["*".to_string()], query);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_headers_injects_forwarding_headers() {
        let headers = HashMap::from([
            ("Accept".to_string(), vec!["application/json".to_string()]),
            ("Authorization".to_string(), vec!["secret".to_string()]),
        ]);
        let filtered = filter_headers(
            &["Accept".to_string()],
            &headers,
            "10.0.0.1",
            "gateway.example.com",
            "curl/8",
        );

        assert!(filtered.contains_key("Accept"));
        assert!(!filtered.contains_key("Authorization"));
        assert_eq!(
            filtered.get("X-Forwarded-For"),
            Some(&vec!["10.0.0.1".to_string()])
        );
        assert_eq!(
            filtered.get("X-Forwarded-Host"),
            Some(&vec!["gateway.example.com".to_string()])
        );
        assert_eq!(
            filtered.get("User-Agent"),
            Some(&vec!["curl/8".to_string()])
        );
    }

    #[test]
    fn test_sequential_endpoint_validation() {
        let mut endpoint = EndpointConfig {
            backend: vec![
                Backend {
                    method: "GET".to_string(),
                    ..Backend::default()
                },
                Backend {
                    method: "POST".to_string(),
                    ..Backend::default()
                },
            ],
            ..EndpointConfig::default()
        };

        // sequential 플래그가 없으면 false
        assert!(!is_valid_sequential_endpoint(&endpoint));

        endpoint.extra_config.insert(
            proxy::NAMESPACE.to_string(),
            json!({"sequential": true}),
        );
        // 마지막 백엔드만 GET이 아니므로 유효
        assert!(is_valid_sequential_endpoint(&endpoint));

        endpoint.backend.insert(
            0,
            Backend {
                method: "DELETE".to_string(),
                ..Backend::default()
            },
        );
        // 중간 백엔드가 GET이 아니므로 무효
        assert!(!is_valid_sequential_endpoint(&endpoint));
    }
}
