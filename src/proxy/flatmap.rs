//! flatmap 포매터
//!
//! `flatmap_filter` 확장이 있으면 단순 포매터 대신 데이터 트리를
//! 경로 연산(`move`/`append`/`del`)으로 재조립합니다. 경로 세그먼트
//! `*`는 그 위치의 배열 원소 전체와 매칭됩니다.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{EndpointConfig, ExtraConfig};

use super::formatter::extract_target;
use super::{from_fn, EntityFormatter, JsonObject, Proxy, NAMESPACE};

const FLATMAP_KEY: &str = "flatmap_filter";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Wildcard,
}

#[derive(Debug, Clone)]
enum FlatmapOp {
    Move { src: Vec<Segment>, dst: Vec<Segment> },
    Append { src: Vec<Segment>, dst: Vec<Segment> },
    Del { paths: Vec<Vec<Segment>> },
}

fn parse_path(path: &str) -> Vec<Segment> {
    path.split('.')
        .map(|s| {
            if s == "*" {
                Segment::Wildcard
            } else {
                Segment::Key(s.to_string())
            }
        })
        .collect()
}

/// 엔드포인트 레벨 flatmap 미들웨어. 병합된 응답에 적용됩니다.
pub fn new_flatmap_middleware(endpoint: &EndpointConfig, next: Proxy) -> Proxy {
    let Some(formatter) = new_flatmap_formatter(&endpoint.extra_config, "", "") else {
        return next;
    };

    from_fn(move |ctx, request| {
        let next = next.clone();
        let formatter = formatter.clone();
        async move {
            let mut result = next(ctx, request).await;
            if result.error.is_none() {
                result.response = result.response.map(|r| formatter(r));
            }
            result
        }
    })
}

/// 확장 맵에서 flatmap 연산 목록을 읽어 포매터를 만듭니다.
/// 연산이 하나도 없으면 `None`.
pub(super) fn new_flatmap_formatter(
    cfg: &ExtraConfig,
    target: &str,
    group: &str,
) -> Option<EntityFormatter> {
    let ops = parse_ops(cfg)?;
    if ops.is_empty() {
        return None;
    }

    let target = target.to_string();
    let prefix = group.to_string();
    Some(Arc::new(move |mut entity| {
        if !target.is_empty() {
            extract_target(&target, &mut entity);
        }

        let mut root = Value::Object(std::mem::take(&mut entity.data));
        for op in &ops {
            apply_op(&mut root, op);
        }
        if let Value::Object(map) = root {
            entity.data = map;
        }

        if !prefix.is_empty() {
            let mut wrapped = JsonObject::new();
            wrapped.insert(
                prefix.clone(),
                Value::Object(std::mem::take(&mut entity.data)),
            );
            entity.data = wrapped;
        }
        entity
    }))
}

fn parse_ops(cfg: &ExtraConfig) -> Option<Vec<FlatmapOp>> {
    let entries = cfg
        .get(NAMESPACE)?
        .as_object()?
        .get(FLATMAP_KEY)?
        .as_array()?;

    let mut ops = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(m) = entry.as_object() else { continue };
        let Some(op_type) = m.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let args: Vec<Vec<Segment>> = m
            .get("args")
            .and_then(|a| a.as_array())
            .map(|args| {
                args.iter()
                    .filter_map(|a| a.as_str().map(parse_path))
                    .collect()
            })
            .unwrap_or_default();

        match op_type {
            "move" if args.len() == 2 => ops.push(FlatmapOp::Move {
                src: args[0].clone(),
                dst: args[1].clone(),
            }),
            "append" if args.len() == 2 => ops.push(FlatmapOp::Append {
                src: args[0].clone(),
                dst: args[1].clone(),
            }),
            "del" => ops.push(FlatmapOp::Del { paths: args }),
            _ => {}
        }
    }
    Some(ops)
}

fn apply_op(root: &mut Value, op: &FlatmapOp) {
    match op {
        FlatmapOp::Move { src, dst } => move_value(root, src, dst),
        FlatmapOp::Append { src, dst } => append_value(root, src, dst),
        FlatmapOp::Del { paths } => {
            for path in paths {
                del_value(root, path);
            }
        }
    }
}

/// 존재하지 않는 경로 삭제는 no-op입니다.
fn del_value(value: &mut Value, path: &[Segment]) {
    let Some((segment, rest)) = path.split_first() else {
        return;
    };
    match (segment, value) {
        (Segment::Key(k), Value::Object(map)) => {
            if rest.is_empty() {
                map.remove(k);
            } else if let Some(v) = map.get_mut(k) {
                del_value(v, rest);
            }
        }
        (Segment::Key(k), Value::Array(items)) => {
            if let Ok(index) = k.parse::<usize>() {
                if rest.is_empty() {
                    if index < items.len() {
                        items.remove(index);
                    }
                } else if let Some(v) = items.get_mut(index) {
                    del_value(v, rest);
                }
            }
        }
        (Segment::Wildcard, Value::Array(items)) => {
            if rest.is_empty() {
                items.clear();
            } else {
                for item in items {
                    del_value(item, rest);
                }
            }
        }
        _ => {}
    }
}

/// 값 또는 하위 트리를 새 경로로 옮깁니다.
///
/// 와일드카드는 src와 dst에서 같은 접두 경로 아래 같은 위치에 있을 때만
/// 지원되며, 그 배열의 원소마다 나머지 경로에 대해 재귀 적용됩니다.
fn move_value(root: &mut Value, src: &[Segment], dst: &[Segment]) {
    match aligned_wildcard(src, dst) {
        Some((prefix, src_rest, dst_rest)) => {
            if let Some(Value::Array(items)) = get_path_mut(root, prefix) {
                for item in items {
                    move_value(item, src_rest, dst_rest);
                }
            }
        }
        None => {
            if src.iter().any(|s| *s == Segment::Wildcard)
                || dst.iter().any(|s| *s == Segment::Wildcard)
            {
                return;
            }
            if let Some(taken) = take_path(root, src) {
                insert_path(root, dst, taken);
            }
        }
    }
}

/// src의 시퀀스를 dst 시퀀스 뒤에 이어 붙이고 src를 제거합니다.
fn append_value(root: &mut Value, src: &[Segment], dst: &[Segment]) {
    match aligned_wildcard(src, dst) {
        Some((prefix, src_rest, dst_rest)) => {
            if let Some(Value::Array(items)) = get_path_mut(root, prefix) {
                for item in items {
                    append_value(item, src_rest, dst_rest);
                }
            }
        }
        None => {
            if src.iter().any(|s| *s == Segment::Wildcard)
                || dst.iter().any(|s| *s == Segment::Wildcard)
            {
                return;
            }
            let Some(taken) = take_path(root, src) else {
                return;
            };
            let items = match taken {
                Value::Array(items) => items,
                other => vec![other],
            };
            match get_path_mut(root, dst) {
                Some(Value::Array(existing)) => existing.extend(items),
                Some(_) => {}
                None => insert_path(root, dst, Value::Array(items)),
            }
        }
    }
}

/// src와 dst가 같은 접두 경로의 같은 위치에 와일드카드를 가지면
/// (접두, src 나머지, dst 나머지)를 돌려줍니다.
fn aligned_wildcard<'a>(
    src: &'a [Segment],
    dst: &'a [Segment],
) -> Option<(&'a [Segment], &'a [Segment], &'a [Segment])> {
    let src_pos = src.iter().position(|s| *s == Segment::Wildcard)?;
    let dst_pos = dst.iter().position(|s| *s == Segment::Wildcard)?;
    if src_pos != dst_pos || src[..src_pos] != dst[..dst_pos] {
        return None;
    }
    Some((&src[..src_pos], &src[src_pos + 1..], &dst[dst_pos + 1..]))
}

fn get_path_mut<'a>(value: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get_mut(k)?,
            (Segment::Key(k), Value::Array(items)) => {
                let index: usize = k.parse().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn take_path(value: &mut Value, path: &[Segment]) -> Option<Value> {
    let (last, parent_path) = path.split_last()?;
    let parent = get_path_mut(value, parent_path)?;
    match (last, parent) {
        (Segment::Key(k), Value::Object(map)) => map.remove(k),
        (Segment::Key(k), Value::Array(items)) => {
            let index: usize = k.parse().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn insert_path(value: &mut Value, path: &[Segment], new_value: Value) {
    let Some((last, parent_path)) = path.split_last() else {
        return;
    };

    let mut current = value;
    for segment in parent_path {
        match segment {
            Segment::Key(k) => match current {
                Value::Object(map) => {
                    let entry = map
                        .entry(k.clone())
                        .or_insert_with(|| Value::Object(JsonObject::new()));
                    if !entry.is_object() && !entry.is_array() {
                        *entry = Value::Object(JsonObject::new());
                    }
                    current = entry;
                }
                Value::Array(items) => {
                    let Ok(index) = k.parse::<usize>() else { return };
                    let Some(item) = items.get_mut(index) else {
                        return;
                    };
                    current = item;
                }
                _ => return,
            },
            Segment::Wildcard => return,
        }
    }

    match (last, current) {
        (Segment::Key(k), Value::Object(map)) => {
            map.insert(k.clone(), new_value);
        }
        (Segment::Key(k), Value::Array(items)) => {
            if let Ok(index) = k.parse::<usize>() {
                if index < items.len() {
                    items[index] = new_value;
                } else {
                    items.push(new_value);
                }
            }
        }
        _ => {}
    }
}
