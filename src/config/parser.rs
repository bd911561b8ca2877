use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{Backend, ConfigError, EndpointConfig, ExtraConfig, Result, ServiceConfig};

/// JSON 설정 문서를 읽어 정규화된 `ServiceConfig`를 만드는 파서.
#[async_trait::async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, config_file: &Path) -> Result<ServiceConfig>;
}

/// 파일 시스템에서 설정을 읽는 기본 파서
#[derive(Debug, Default)]
pub struct FileConfigParser;

#[async_trait::async_trait]
impl Parser for FileConfigParser {
    async fn parse(&self, config_file: &Path) -> Result<ServiceConfig> {
        let path = config_file.to_string_lossy().to_string();
        let content = tokio::fs::read(config_file)
            .await
            .map_err(|e| ConfigError::File {
                path: path.clone(),
                error: e.to_string(),
            })?;

        let raw: RawServiceConfig =
            serde_json::from_slice(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                row: e.line(),
                col: e.column(),
                error: e.to_string(),
            })?;

        let mut cfg = raw.normalize();
        cfg.init()?;

        debug!(file = %path, endpoints = cfg.endpoints.len(), "설정 파일 로드 완료");
        Ok(cfg)
    }
}

/// 문자열 duration (`<number><unit>`; ns/us/ms/s/m/h) 파싱.
/// 파싱 실패는 0으로 처리합니다.
pub fn parse_duration(v: &str) -> Duration {
    static SEGMENT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^([0-9]+(?:\.[0-9]+)?)(ns|us|µs|ms|s|m|h)").expect("duration pattern")
    });

    if v.is_empty() {
        return Duration::ZERO;
    }

    let mut rest = v;
    let mut total = 0.0_f64;
    while !rest.is_empty() {
        let Some(caps) = SEGMENT.captures(rest) else {
            return Duration::ZERO;
        };
        let full = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let number: f64 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            Some(n) => n,
            None => return Duration::ZERO,
        };
        let scale = match caps.get(2).map(|m| m.as_str()) {
            Some("ns") => 1e-9,
            Some("us") | Some("µs") => 1e-6,
            Some("ms") => 1e-3,
            Some("s") => 1.0,
            Some("m") => 60.0,
            Some("h") => 3600.0,
            _ => return Duration::ZERO,
        };
        total += number * scale;
        rest = &rest[full.len()..];
    }
    Duration::from_secs_f64(total)
}

/// 사람이 쓰는 원본 문서 형태. duration은 문자열, 생략 가능한 필드는 기본값.
#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    endpoints: Vec<RawEndpointConfig>,
    #[serde(default)]
    timeout: String,
    #[serde(default)]
    cache_ttl: String,
    #[serde(default)]
    host: Vec<String>,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    output_encoding: String,
    #[serde(default)]
    extra_config: ExtraConfig,
    #[serde(default)]
    read_timeout: String,
    #[serde(default)]
    write_timeout: String,
    #[serde(default)]
    idle_timeout: String,
    #[serde(default)]
    read_header_timeout: String,
    #[serde(default)]
    disable_keep_alives: bool,
    #[serde(default)]
    disable_compression: bool,
    #[serde(default)]
    max_idle_connections: usize,
    #[serde(default)]
    max_idle_connections_per_host: usize,
    #[serde(default)]
    idle_connection_timeout: String,
    #[serde(default)]
    dialer_timeout: String,
    #[serde(default)]
    dialer_keep_alive: String,
    #[serde(default, rename = "disable_rest")]
    disable_strict_rest: bool,
    #[serde(default)]
    debug: bool,
}

impl RawServiceConfig {
    fn normalize(self) -> ServiceConfig {
        ServiceConfig {
            name: self.name,
            endpoints: self.endpoints.into_iter().map(|e| e.normalize()).collect(),
            timeout: parse_duration(&self.timeout),
            cache_ttl: parse_duration(&self.cache_ttl),
            host: self.host,
            port: self.port,
            version: self.version,
            output_encoding: self.output_encoding,
            extra_config: self.extra_config,
            read_timeout: parse_duration(&self.read_timeout),
            write_timeout: parse_duration(&self.write_timeout),
            idle_timeout: parse_duration(&self.idle_timeout),
            read_header_timeout: parse_duration(&self.read_header_timeout),
            disable_keep_alives: self.disable_keep_alives,
            disable_compression: self.disable_compression,
            max_idle_connections: self.max_idle_connections,
            max_idle_connections_per_host: self.max_idle_connections_per_host,
            idle_connection_timeout: parse_duration(&self.idle_connection_timeout),
            dialer_timeout: parse_duration(&self.dialer_timeout),
            dialer_keep_alive: parse_duration(&self.dialer_keep_alive),
            disable_strict_rest: self.disable_strict_rest,
            debug: self.debug,
            ..ServiceConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    backend: Vec<RawBackend>,
    #[serde(default)]
    concurrent_calls: usize,
    #[serde(default)]
    timeout: String,
    /// 엔드포인트 cache_ttl은 초 단위 정수입니다
    #[serde(default)]
    cache_ttl: u64,
    #[serde(default)]
    querystring_params: Vec<String>,
    #[serde(default)]
    headers_to_pass: Vec<String>,
    #[serde(default)]
    output_encoding: String,
    #[serde(default)]
    extra_config: ExtraConfig,
}

impl RawEndpointConfig {
    fn normalize(self) -> EndpointConfig {
        EndpointConfig {
            endpoint: self.endpoint,
            method: self.method,
            backend: self.backend.into_iter().map(|b| b.normalize()).collect(),
            concurrent_calls: self.concurrent_calls,
            timeout: parse_duration(&self.timeout),
            cache_ttl: Duration::from_secs(self.cache_ttl),
            query_string: self.querystring_params,
            headers_to_pass: self.headers_to_pass,
            output_encoding: self.output_encoding,
            extra_config: self.extra_config,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    #[serde(default)]
    group: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    host: Vec<String>,
    #[serde(default)]
    disable_host_sanitize: bool,
    #[serde(default)]
    url_pattern: String,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default)]
    mapping: BTreeMap<String, String>,
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    is_collection: bool,
    #[serde(default)]
    target: String,
    #[serde(default, rename = "discovery")]
    sd: String,
    #[serde(default)]
    extra_config: ExtraConfig,
}

impl RawBackend {
    fn normalize(self) -> Backend {
        Backend {
            group: self.group,
            method: self.method,
            host: self.host,
            disable_host_sanitize: self.disable_host_sanitize,
            url_pattern: self.url_pattern,
            allow: self.allow,
            deny: self.deny,
            mapping: self.mapping,
            encoding: self.encoding,
            is_collection: self.is_collection,
            target: self.target,
            sd: self.sd,
            extra_config: self.extra_config,
            ..Backend::default()
        }
    }
}
