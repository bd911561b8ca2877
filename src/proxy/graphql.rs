//! GraphQL 요청 재작성 미들웨어
//!
//! query 연산은 요청 파라미터에서, mutation 연산은 요청 바디에서
//! GraphQL 요청을 만들어 아웃바운드 요청을 바꿉니다. 설정된 변수와
//! 바디의 변수가 겹치면 바디가 이깁니다.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{capitalize_ascii, Backend};

use super::{from_fn, CallResult, Context, JsonObject, Proxy, ProxyError, Request};

/// GraphQL 컴포넌트의 확장 맵 네임스페이스
pub const GRAPHQL_NAMESPACE: &str = "sonic/graphql";

const OPERATION_QUERY: &str = "query";
const OPERATION_MUTATION: &str = "mutation";

#[derive(Debug, Clone, Serialize)]
struct GraphQLRequest {
    query: String,
    #[serde(rename = "operationName", skip_serializing_if = "String::is_empty")]
    operation_name: String,
    #[serde(skip_serializing_if = "JsonObject::is_empty")]
    variables: JsonObject,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Options {
    #[serde(default)]
    query: String,
    #[serde(default, rename = "operationName")]
    operation_name: String,
    #[serde(default)]
    variables: JsonObject,
    #[serde(default)]
    query_path: String,
    #[serde(default, rename = "type")]
    operation_type: String,
    #[serde(default)]
    method: String,
}

fn get_options(remote: &Backend) -> Option<Options> {
    let raw = remote.extra_config.get(GRAPHQL_NAMESPACE)?.clone();
    let mut options: Options = serde_json::from_value(raw).ok()?;

    options.operation_type = options.operation_type.to_lowercase();
    options.method = options.method.to_uppercase();
    if options.method != "GET" && options.method != "POST" {
        options.method = "POST".to_string();
    }

    if !options.query_path.is_empty() {
        options.query = std::fs::read_to_string(&options.query_path).ok()?;
    }

    Some(options)
}

/// 백엔드에 GraphQL 설정이 있으면 아웃바운드 요청을 재작성하는
/// 미들웨어를 만들고, 없으면 안쪽 프록시를 그대로 돌려줍니다.
pub fn new_graphql_middleware(remote: &Backend, next: Proxy) -> Proxy {
    let Some(options) = get_options(remote) else {
        return next;
    };
    if options.operation_type != OPERATION_QUERY
        && options.operation_type != OPERATION_MUTATION
    {
        return next;
    }

    let extractor = Arc::new(Extractor::new(options.clone()));
    let is_mutation = options.operation_type == OPERATION_MUTATION;
    let use_get = options.method == "GET";
    let method = options.method.clone();

    from_fn(move |ctx: Context, request: Request| {
        let extractor = extractor.clone();
        let next = next.clone();
        let method = method.clone();
        async move {
            let mut r = request;

            if use_get {
                let query = if is_mutation {
                    extractor.query_from_body(r.body.as_deref().unwrap_or_default())
                } else {
                    Ok(extractor.query_from_params(&r.params))
                };
                let query = match query {
                    Ok(q) => q,
                    Err(e) => return CallResult::failure(e),
                };

                r.body = Some(Bytes::new());
                r.method = method;
                r.headers
                    .insert("Content-Length".to_string(), vec!["0".to_string()]);
                for (key, values) in query {
                    r.query.entry(key).or_default().extend(values);
                }
            } else {
                let body = if is_mutation {
                    extractor.body_from_body(r.body.as_deref().unwrap_or_default())
                } else {
                    extractor.body_from_params(&r.params)
                };
                let body = match body {
                    Ok(b) => b,
                    Err(e) => return CallResult::failure(e),
                };

                r.headers.insert(
                    "Content-Length".to_string(),
                    vec![body.len().to_string()],
                );
                r.body = Some(Bytes::from(body));
                r.method = method;
            }

            next(ctx, r).await
        }
    })
}

struct Extractor {
    options: Options,
    /// `"{param}"` 형태의 변수 → 정규화된 파라미터 키
    replacements: Vec<(String, String)>,
}

impl Extractor {
    fn new(options: Options) -> Self {
        let mut replacements = Vec::new();
        for (key, value) in &options.variables {
            let Some(val) = value.as_str() else { continue };
            if val.len() > 2 && val.starts_with('{') && val.ends_with('}') {
                let param = capitalize_ascii(&val[1..val.len() - 1]);
                replacements.push((key.clone(), param));
            }
        }
        Self {
            options,
            replacements,
        }
    }

    fn request_from_params(&self, params: &HashMap<String, String>) -> GraphQLRequest {
        let mut variables = self.options.variables.clone();
        for (key, param) in &self.replacements {
            let value = params.get(param).cloned().unwrap_or_default();
            variables.insert(key.clone(), Value::String(value));
        }
        GraphQLRequest {
            query: self.options.query.clone(),
            operation_name: self.options.operation_name.clone(),
            variables,
        }
    }

    fn request_from_body(&self, body: &[u8]) -> Result<GraphQLRequest, ProxyError> {
        let mut variables: JsonObject = if body.is_empty() {
            JsonObject::new()
        } else {
            serde_json::from_slice(body).map_err(|e| ProxyError::Decode(e.to_string()))?
        };

        // 설정된 변수 중 바디에 없는 것만 채운다 (바디가 이긴다)
        for (key, value) in &self.options.variables {
            if !variables.contains_key(key) {
                variables.insert(key.clone(), value.clone());
            }
        }

        Ok(GraphQLRequest {
            query: self.options.query.clone(),
            operation_name: self.options.operation_name.clone(),
            variables,
        })
    }

    fn body_from_params(&self, params: &HashMap<String, String>) -> Result<Vec<u8>, ProxyError> {
        let request = self.request_from_params(params);
        serde_json::to_vec(&request).map_err(|e| ProxyError::Decode(e.to_string()))
    }

    fn body_from_body(&self, body: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let request = self.request_from_body(body)?;
        serde_json::to_vec(&request).map_err(|e| ProxyError::Decode(e.to_string()))
    }

    fn query_from_params(&self, params: &HashMap<String, String>) -> HashMap<String, Vec<String>> {
        query_values(self.request_from_params(params))
    }

    fn query_from_body(&self, body: &[u8]) -> Result<HashMap<String, Vec<String>>, ProxyError> {
        Ok(query_values(self.request_from_body(body)?))
    }
}

fn query_values(request: GraphQLRequest) -> HashMap<String, Vec<String>> {
    let mut values = HashMap::new();
    values.insert("query".to_string(), vec![request.query.clone()]);
    if !request.operation_name.is_empty() {
        values.insert(
            "operationName".to_string(),
            vec![request.operation_name.clone()],
        );
    }
    if !request.variables.is_empty() {
        if let Ok(encoded) = serde_json::to_string(&request.variables) {
            values.insert("variables".to_string(), vec![encoded]);
        }
    }
    values
}
