//! 설정 모듈
//!
//! 선언적 설정 문서를 파싱해 정규화된 불변 모델(`ServiceConfig` →
//! `EndpointConfig` → `Backend`)을 만듭니다. `init` 이후에는 읽기 전용입니다.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::encoding::{self, Decoder, JsonObject};

mod parser;
pub mod uri;

pub use parser::{parse_duration, FileConfigParser, Parser};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// 확장 맵. 컴포넌트별 네임스페이스 아래에 불투명한 트리를 담습니다.
pub type ExtraConfig = JsonObject;

/// 지원하는 설정 문서 버전
pub const CONFIG_VERSION: i64 = 1;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_IDLE_CONNECTIONS_PER_HOST: usize = 250;

/// 디버그용으로 예약된 경로 패턴. 엔드포인트로 쓸 수 없습니다.
static DEBUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^/]|/__debug(/.*)?$").expect("debug pattern"));

/// 순차 병합(`respN_*`)과 JWT 의사 파라미터를 허용하는 패턴.
/// 빈 문자열도 통과시키는 원래 동작을 그대로 유지합니다.
static SEQUENTIAL_PARAMS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(resp[0-9]+_.*)?(JWT\.([a-zA-Z0-9\-_.]*))?$").expect("sequential params pattern"));

/// 라우터 어댑터가 기대하는 경로 플레이스홀더 표기
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoutingPattern {
    Brackets,
    Colon,
}

impl Default for RoutingPattern {
    fn default() -> Self {
        Self::Colon
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceConfig {
    /// 서비스 이름. 해시 계산에서 제외됩니다.
    #[serde(skip)]
    pub name: String,
    pub endpoints: Vec<EndpointConfig>,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub host: Vec<String>,
    pub port: u16,
    pub version: i64,
    pub output_encoding: String,
    pub extra_config: ExtraConfig,

    // 서버/클라이언트 튜닝 값. 파이프라인 자체는 읽지 않고 HTTP 글루가 씁니다.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub read_header_timeout: Duration,
    pub disable_keep_alives: bool,
    pub disable_compression: bool,
    pub max_idle_connections: usize,
    pub max_idle_connections_per_host: usize,
    pub idle_connection_timeout: Duration,
    pub dialer_timeout: Duration,
    pub dialer_keep_alive: Duration,

    /// `{name}` 플레이스홀더 추출을 비엄격 모드(`{a.b}` 허용)로 바꿉니다.
    pub disable_strict_rest: bool,
    pub debug: bool,
    #[serde(skip)]
    pub routing_pattern: RoutingPattern,
    #[serde(skip)]
    pub initialized: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointConfig {
    /// 인바운드 경로. `{name}` 플레이스홀더를 가질 수 있습니다.
    pub endpoint: String,
    pub method: String,
    pub backend: Vec<Backend>,
    pub concurrent_calls: usize,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub query_string: Vec<String>,
    pub headers_to_pass: Vec<String>,
    pub output_encoding: String,
    pub extra_config: ExtraConfig,
}

#[derive(Clone, Serialize)]
pub struct Backend {
    pub group: String,
    pub method: String,
    pub host: Vec<String>,
    pub disable_host_sanitize: bool,
    /// 정규화 후에는 `{{.Key}}` 템플릿 토큰을 담습니다.
    pub url_pattern: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub mapping: BTreeMap<String, String>,
    pub encoding: String,
    pub is_collection: bool,
    pub target: String,
    /// 서비스 디스커버리 태그
    pub sd: String,
    /// url_pattern에서 추출한 정규화된 키 목록 (선언 순서)
    pub url_keys: Vec<String>,
    pub concurrent_calls: usize,
    pub timeout: Duration,
    #[serde(skip)]
    pub decoder: Decoder,
    pub extra_config: ExtraConfig,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            group: String::new(),
            method: String::new(),
            host: Vec::new(),
            disable_host_sanitize: false,
            url_pattern: String::new(),
            allow: Vec::new(),
            deny: Vec::new(),
            mapping: BTreeMap::new(),
            encoding: String::new(),
            is_collection: false,
            target: String::new(),
            sd: String::new(),
            url_keys: Vec::new(),
            concurrent_calls: 1,
            timeout: Duration::ZERO,
            decoder: encoding::new_json_decoder(false),
            extra_config: ExtraConfig::new(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("group", &self.group)
            .field("method", &self.method)
            .field("host", &self.host)
            .field("url_pattern", &self.url_pattern)
            .field("allow", &self.allow)
            .field("deny", &self.deny)
            .field("mapping", &self.mapping)
            .field("encoding", &self.encoding)
            .field("is_collection", &self.is_collection)
            .field("target", &self.target)
            .field("sd", &self.sd)
            .field("url_keys", &self.url_keys)
            .field("concurrent_calls", &self.concurrent_calls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ServiceConfig {
    /// 설정을 검증하고 기본값을 채워 불변 모델로 만듭니다.
    /// 이미 초기화된 설정에 대해서는 아무것도 하지 않습니다 (멱등).
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                have: self.version,
                want: CONFIG_VERSION,
            });
        }

        self.init_global_params()?;
        self.init_endpoints()?;
        self.initialized = true;
        Ok(())
    }

    /// 이름을 제외한 전체 설정의 안정적인 내용 해시.
    /// 직렬화 키 순서가 고정되어 있어 실행 간에 같은 값이 나옵니다.
    pub fn hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        let sum = Sha256::digest(&bytes);
        Ok(BASE64.encode(sum))
    }

    fn init_global_params(&mut self) -> Result<()> {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.max_idle_connections_per_host == 0 {
            self.max_idle_connections_per_host = DEFAULT_MAX_IDLE_CONNECTIONS_PER_HOST;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }

        self.host = uri::clean_hosts(&self.host)?;
        Ok(())
    }

    fn init_endpoints(&mut self) -> Result<()> {
        let strict_rest = !self.disable_strict_rest;
        let service_host = self.host.clone();
        let service_timeout = self.timeout;
        let service_cache_ttl = self.cache_ttl;
        let service_output_encoding = self.output_encoding.clone();
        let routing_pattern = self.routing_pattern;

        for endpoint in &mut self.endpoints {
            endpoint.endpoint = uri::clean_path(&endpoint.endpoint);
            endpoint.validate()?;

            for header in &mut endpoint.headers_to_pass {
                *header = canonical_header_key(header);
            }

            let input_params = uri::extract_placeholders(&endpoint.endpoint, strict_rest);
            let input_set: HashSet<String> = input_params.iter().cloned().collect();

            endpoint.endpoint =
                uri::get_endpoint_path(&endpoint.endpoint, &input_params, routing_pattern);

            endpoint.apply_defaults(
                service_timeout,
                service_cache_ttl,
                &service_output_encoding,
            );

            if endpoint.output_encoding == encoding::NOOP && endpoint.backend.len() > 1 {
                return Err(ConfigError::InvalidNoOpEncoding);
            }

            let endpoint_path = endpoint.endpoint.clone();
            let endpoint_method = endpoint.method.clone();
            let endpoint_timeout = endpoint.timeout;
            let endpoint_concurrent_calls = endpoint.concurrent_calls;

            for (index, backend) in endpoint.backend.iter_mut().enumerate() {
                backend.apply_defaults(
                    &service_host,
                    &endpoint_method,
                    endpoint_timeout,
                    endpoint_concurrent_calls,
                )?;
                backend.init_url_mappings(&endpoint_path, &endpoint_method, index, &input_set)?;
            }
        }
        Ok(())
    }
}

impl EndpointConfig {
    fn validate(&self) -> Result<()> {
        if DEBUG_PATTERN.is_match(&self.endpoint) {
            return Err(ConfigError::EndpointPath {
                path: self.endpoint.clone(),
                method: self.method.clone(),
            });
        }
        if self.backend.is_empty() {
            return Err(ConfigError::NoBackends {
                path: self.endpoint.clone(),
                method: self.method.clone(),
            });
        }
        Ok(())
    }

    fn apply_defaults(
        &mut self,
        service_timeout: Duration,
        service_cache_ttl: Duration,
        service_output_encoding: &str,
    ) {
        if self.method.is_empty() {
            self.method = "GET".to_string();
        }
        if !service_cache_ttl.is_zero() && self.cache_ttl.is_zero() {
            self.cache_ttl = service_cache_ttl;
        }
        if !service_timeout.is_zero() && self.timeout.is_zero() {
            self.timeout = service_timeout;
        }
        if self.concurrent_calls == 0 {
            self.concurrent_calls = 1;
        }
        if self.output_encoding.is_empty() {
            self.output_encoding = if service_output_encoding.is_empty() {
                encoding::JSON.to_string()
            } else {
                service_output_encoding.to_string()
            };
        }
    }
}

impl Backend {
    fn apply_defaults(
        &mut self,
        service_host: &[String],
        endpoint_method: &str,
        endpoint_timeout: Duration,
        endpoint_concurrent_calls: usize,
    ) -> Result<()> {
        if self.host.is_empty() {
            self.host = service_host.to_vec();
        } else if !self.disable_host_sanitize {
            self.host = uri::clean_hosts(&self.host)?;
        }
        if self.method.is_empty() {
            self.method = endpoint_method.to_string();
        }
        self.timeout = endpoint_timeout;
        self.concurrent_calls = endpoint_concurrent_calls;
        self.decoder =
            encoding::get_register().get(&self.encoding.to_lowercase())(self.is_collection);
        Ok(())
    }

    /// 백엔드 URL 패턴의 플레이스홀더를 검증하고 `{{.Key}}` 토큰으로
    /// 치환합니다. 입력 집합에 없는 출력 파라미터는 순차/JWT 의사
    /// 파라미터일 때만 허용됩니다.
    fn init_url_mappings(
        &mut self,
        endpoint_path: &str,
        endpoint_method: &str,
        backend_index: usize,
        input_set: &HashSet<String>,
    ) -> Result<()> {
        self.url_pattern = uri::clean_path(&self.url_pattern);

        let (output_params, output_set_size) =
            unique_output(uri::extract_simple_placeholders(&self.url_pattern));

        let mut input_params: Vec<String> = input_set.iter().cloned().collect();
        input_params.sort();

        if output_set_size > input_params.len() {
            return Err(ConfigError::WrongNumberOfParams {
                endpoint: endpoint_path.to_string(),
                method: endpoint_method.to_string(),
                backend: backend_index,
                input_params,
                output_params,
            });
        }

        self.url_keys = Vec::with_capacity(output_params.len());
        for output in &output_params {
            if !SEQUENTIAL_PARAMS_PATTERN.is_match(output) && !input_set.contains(output) {
                return Err(ConfigError::UndefinedOutputParam {
                    param: output.clone(),
                    endpoint: endpoint_path.to_string(),
                    method: endpoint_method.to_string(),
                    backend: backend_index,
                    input_params,
                    output_params: output_params.clone(),
                });
            }
            let key = capitalize_ascii(output);
            self.url_pattern = self
                .url_pattern
                .replace(&format!("{{{}}}", output), &format!("{{{{.{}}}}}", key));
            self.url_keys.push(key);
        }
        Ok(())
    }
}

/// 플레이스홀더 이름의 첫 글자를 대문자로 바꿔 대소문자 안정성을
/// 보장합니다. 플레이스홀더는 ASCII 전용이며, ASCII가 아닌 첫 글자는
/// 건드리지 않습니다.
pub fn capitalize_ascii(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            let mut out = String::with_capacity(s.len());
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
            out
        }
        _ => s.to_string(),
    }
}

/// MIME 스타일 헤더 키 정규화 (`x-user-id` → `X-User-Id`)
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if upper_next && c.is_ascii_lowercase() {
            out.push(c.to_ascii_uppercase());
        } else if !upper_next && c.is_ascii_uppercase() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
        upper_next = c == '-';
    }
    out
}

/// 정렬·중복 제거한 출력 파라미터와, 순차/JWT 의사 파라미터를 제외한
/// 실제 출력 집합 크기를 반환합니다.
fn unique_output(mut output: Vec<String>) -> (Vec<String>, usize) {
    output.sort();
    output.dedup();
    let set_size = output
        .iter()
        .filter(|o| !SEQUENTIAL_PARAMS_PATTERN.is_match(o))
        .count();
    (output, set_size)
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    UnsupportedVersion {
        have: i64,
        want: i64,
    },
    EndpointPath {
        path: String,
        method: String,
    },
    NoBackends {
        path: String,
        method: String,
    },
    InvalidHost(String),
    InvalidNoOpEncoding,
    UndefinedOutputParam {
        param: String,
        endpoint: String,
        method: String,
        backend: usize,
        input_params: Vec<String>,
        output_params: Vec<String>,
    },
    WrongNumberOfParams {
        endpoint: String,
        method: String,
        backend: usize,
        input_params: Vec<String>,
        output_params: Vec<String>,
    },
    File {
        path: String,
        error: String,
    },
    Parse {
        path: String,
        row: usize,
        col: usize,
        error: String,
    },
    Serialization(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { have, want } => {
                write!(f, "unsupported version: {} (want: {})", have, want)
            }
            Self::EndpointPath { path, method } => {
                write!(
                    f,
                    "ignoring the '{} {}' endpoint, since it is invalid!!!",
                    method, path
                )
            }
            Self::NoBackends { path, method } => {
                write!(
                    f,
                    "ignoring the '{} {}' endpoint, since it has 0 backends defined!",
                    method, path
                )
            }
            Self::InvalidHost(host) => write!(f, "invalid host: {}", host),
            Self::InvalidNoOpEncoding => write!(
                f,
                "can not use NoOp encoding with more than one backends connected to the same endpoint"
            ),
            Self::UndefinedOutputParam {
                param,
                endpoint,
                method,
                backend,
                input_params,
                output_params,
            } => write!(
                f,
                "undefined output param '{}'! endpoint: {} {}, backend: {}. input: {:?}, output: {:?}",
                param, method, endpoint, backend, input_params, output_params
            ),
            Self::WrongNumberOfParams {
                endpoint,
                method,
                backend,
                input_params,
                output_params,
            } => write!(
                f,
                "input and output params do not match. endpoint: {} {}, backend: {}. input: {:?}, output: {:?}",
                method, endpoint, backend, input_params, output_params
            ),
            Self::File { path, error } => write!(f, "'{}': {}", path, error),
            Self::Parse {
                path,
                row,
                col,
                error,
            } => write!(f, "'{}': {}, row: {}, col: {}", path, error, row, col),
            Self::Serialization(msg) => write!(f, "config serialization error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
