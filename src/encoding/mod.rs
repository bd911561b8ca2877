//! 인코딩 모듈
//!
//! 백엔드 응답 바이트를 제네릭 데이터 트리로 변환하는 디코더들을 제공합니다.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

mod register;

pub use register::{get_register, DecoderRegister};

/// 응답 데이터 트리. 키 → 임의 JSON 값.
pub type JsonObject = serde_json::Map<String, Value>;

/// 바이트 버퍼를 데이터 트리로 변환하는 함수
pub type Decoder = Arc<dyn Fn(&[u8]) -> Result<JsonObject, DecodeError> + Send + Sync>;

/// is_collection 플래그를 받아 디코더를 만드는 팩토리
pub type DecoderFactory = fn(bool) -> Decoder;

pub const JSON: &str = "json";
pub const SAFE_JSON: &str = "safejson";
pub const STRING: &str = "string";
/// 패스스루 계약을 뜻하는 센티널 인코딩 이름
pub const NOOP: &str = "no-op";

#[derive(Debug, Clone)]
pub enum DecodeError {
    Json(String),
    InvalidUtf8,
    UnexpectedShape { want: &'static str },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(msg) => write!(f, "json decode error: {}", msg),
            Self::InvalidUtf8 => write!(f, "response body is not valid utf-8"),
            Self::UnexpectedShape { want } => {
                write!(f, "unexpected payload shape, want {}", want)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

pub fn new_json_decoder(is_collection: bool) -> Decoder {
    if is_collection {
        Arc::new(json_collection_decoder)
    } else {
        Arc::new(json_decoder)
    }
}

fn json_decoder(data: &[u8]) -> Result<JsonObject, DecodeError> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::UnexpectedShape { want: "object" }),
    }
}

fn json_collection_decoder(data: &[u8]) -> Result<JsonObject, DecodeError> {
    match serde_json::from_slice::<Value>(data)? {
        Value::Array(items) => {
            let mut map = JsonObject::new();
            map.insert("collection".to_string(), Value::Array(items));
            Ok(map)
        }
        _ => Err(DecodeError::UnexpectedShape { want: "array" }),
    }
}

pub fn new_safe_json_decoder(_is_collection: bool) -> Decoder {
    Arc::new(safe_json_decoder)
}

/// 객체/배열/스칼라를 모두 수용하는 관대한 JSON 디코더
fn safe_json_decoder(data: &[u8]) -> Result<JsonObject, DecodeError> {
    let value: Value = serde_json::from_slice(data)?;
    let mut map = JsonObject::new();
    match value {
        Value::Object(obj) => return Ok(obj),
        Value::Array(items) => {
            map.insert("collection".to_string(), Value::Array(items));
        }
        other => {
            map.insert("result".to_string(), other);
        }
    }
    Ok(map)
}

pub fn new_string_decoder(_is_collection: bool) -> Decoder {
    Arc::new(string_decoder)
}

fn string_decoder(data: &[u8]) -> Result<JsonObject, DecodeError> {
    let content = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidUtf8)?;
    let mut map = JsonObject::new();
    map.insert("content".to_string(), Value::String(content.to_string()));
    Ok(map)
}

pub fn new_no_op_decoder(_is_collection: bool) -> Decoder {
    Arc::new(|_| Ok(JsonObject::new()))
}
