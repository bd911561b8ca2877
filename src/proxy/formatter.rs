use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::Backend;

use super::flatmap::new_flatmap_formatter;
use super::{JsonObject, Response};

/// 응답 데이터 트리에 대한 순수 변환
pub type EntityFormatter = Arc<dyn Fn(Response) -> Response + Send + Sync>;

/// 백엔드 설정에서 엔티티 포매터를 만듭니다.
///
/// 확장 맵에 flatmap 필터가 있으면 그것이 단순 포매터를 대체합니다.
/// 그렇지 않으면 target → allow/deny → mapping → group 순서로 적용하는
/// 포매터를 돌려줍니다.
pub fn new_entity_formatter(remote: &Backend) -> EntityFormatter {
    if let Some(formatter) =
        new_flatmap_formatter(&remote.extra_config, &remote.target, &remote.group)
    {
        return formatter;
    }

    let target = remote.target.clone();
    let prefix = remote.group.clone();
    let property_filter = new_property_filter(remote);
    let mapping: BTreeMap<String, String> = remote
        .mapping
        .iter()
        .map(|(old, new)| {
            // 다중 세그먼트 매핑은 첫 세그먼트만 유효하다
            let first = new.split('.').next().unwrap_or(new);
            (old.clone(), first.to_string())
        })
        .collect();

    Arc::new(move |mut entity: Response| {
        if !target.is_empty() {
            extract_target(&target, &mut entity);
        }
        if !entity.data.is_empty() {
            property_filter(&mut entity);
        }
        if !entity.data.is_empty() {
            for (former_key, new_key) in &mapping {
                if let Some(v) = entity.data.remove(former_key) {
                    entity.data.insert(new_key.clone(), v);
                }
            }
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
    })
}

type PropertyFilter = Arc<dyn Fn(&mut Response) + Send + Sync>;

fn new_property_filter(remote: &Backend) -> PropertyFilter {
    if !remote.allow.is_empty() {
        new_allowlisting_filter(&remote.allow)
    } else {
        new_denylisting_filter(&remote.deny)
    }
}

/// target 경로를 따라 내려가 데이터 트리를 치환합니다.
/// 세그먼트가 없거나 객체가 아니면 빈 객체로 대체합니다 (소프트 실패).
pub(super) fn extract_target(target: &str, entity: &mut Response) {
    for part in target.split('.') {
        let next = match entity.data.get(part) {
            Some(Value::Object(map)) => map.clone(),
            _ => {
                entity.data = JsonObject::new();
                return;
            }
        };
        entity.data = next;
    }
}

fn new_allowlisting_filter(allowlist: &[String]) -> PropertyFilter {
    let mut wl_dict = JsonObject::new();
    for key in allowlist {
        let fields: Vec<&str> = key.split('.').collect();
        let leaf = build_dict_path(&mut wl_dict, &fields[..fields.len() - 1]);
        leaf.insert(fields[fields.len() - 1].to_string(), Value::Bool(true));
    }

    Arc::new(move |entity: &mut Response| {
        if allowlist_prune(&wl_dict, &mut entity.data) {
            entity.data.clear();
        }
    })
}

/// allow-list에 없는 키를 제거합니다. 후위 순회라서 비어 버린 하위
/// 트리는 그 자체로 제거 대상이 됩니다. 반환값은 "이 트리 전체를
/// 지워도 되는가"입니다.
pub(super) fn allowlist_prune(wl_dict: &JsonObject, in_dict: &mut JsonObject) -> bool {
    let mut can_delete = true;
    let keys: Vec<String> = in_dict.keys().cloned().collect();
    for k in keys {
        let mut delete_sibling = true;
        if let Some(sub_wl) = wl_dict.get(&k) {
            if let Value::Object(sub_wl_dict) = sub_wl {
                if let Some(Value::Object(sub_in_dict)) = in_dict.get_mut(&k) {
                    if !allowlist_prune(sub_wl_dict, sub_in_dict) {
                        delete_sibling = false;
                    }
                }
            } else {
                delete_sibling = false;
            }
        }
        if delete_sibling {
            in_dict.remove(&k);
        } else {
            can_delete = false;
        }
    }
    can_delete
}

fn build_dict_path<'a>(accumulator: &'a mut JsonObject, fields: &[&str]) -> &'a mut JsonObject {
    let mut current = accumulator;
    for field in fields {
        let entry = current
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(JsonObject::new()));
        if !entry.is_object() {
            *entry = Value::Object(JsonObject::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
    }
    current
}

fn new_denylisting_filter(denylist: &[String]) -> PropertyFilter {
    let mut bl: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in denylist {
        let mut parts = key.splitn(2, '.');
        let head = parts.next().unwrap_or_default().to_string();
        match parts.next() {
            Some(sub) => bl.entry(head).or_default().push(sub.to_string()),
            None => {
                bl.entry(head).or_default();
            }
        }
    }

    Arc::new(move |entity: &mut Response| {
        for (k, sub) in &bl {
            if sub.is_empty() {
                entity.data.remove(k);
            } else if let Some(Value::Object(tmp)) = entity.data.get_mut(k) {
                for key in sub {
                    tmp.remove(key);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_with(data: Value) -> Response {
        Response {
            data: data.as_object().cloned().unwrap_or_default(),
            is_complete: true,
            ..Response::default()
        }
    }

    fn backend() -> Backend {
        Backend::default()
    }

    #[test]
    fn test_target_extraction() {
        let mut remote = backend();
        remote.target = "data.inner".to_string();
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({
            "data": {"inner": {"a": 1}}
        })));
        assert_eq!(result.data.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_target_missing_yields_empty_object() {
        let mut remote = backend();
        remote.target = "data.missing".to_string();
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({"data": {"other": 1}})));
        assert!(result.data.is_empty());
        // 소프트 실패: 오류가 아니라 빈 객체
        assert!(result.is_complete);
    }

    #[test]
    fn test_target_non_object_yields_empty_object() {
        let mut remote = backend();
        remote.target = "data".to_string();
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({"data": 42})));
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_allowlist_keeps_only_listed_paths() {
        let mut remote = backend();
        remote.allow = vec!["a".to_string(), "nested.keep".to_string()];
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({
            "a": 1,
            "b": 2,
            "nested": {"keep": true, "drop": false}
        })));

        assert_eq!(result.data.get("a"), Some(&json!(1)));
        assert!(result.data.get("b").is_none());
        assert_eq!(result.data.get("nested"), Some(&json!({"keep": true})));
    }

    #[test]
    fn test_allowlist_prunes_empty_ancestors_recursively() {
        let mut remote = backend();
        remote.allow = vec!["deep.a.b".to_string()];
        let formatter = new_entity_formatter(&remote);

        // allow 경로가 실제 데이터에 없으면 비어 버린 조상들까지 지워진다
        let result = formatter(response_with(json!({
            "deep": {"a": {"c": 1}, "x": 2},
            "top": 3
        })));
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_denylist_removes_paths() {
        let mut remote = backend();
        remote.deny = vec!["secret".to_string(), "nested.password".to_string()];
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({
            "secret": "x",
            "keep": 1,
            "nested": {"password": "y", "user": "z"}
        })));

        assert!(result.data.get("secret").is_none());
        assert_eq!(result.data.get("keep"), Some(&json!(1)));
        assert_eq!(result.data.get("nested"), Some(&json!({"user": "z"})));
    }

    #[test]
    fn test_mapping_renames_top_level_keys() {
        let mut remote = backend();
        remote
            .mapping
            .insert("old".to_string(), "new".to_string());
        remote
            .mapping
            .insert("other".to_string(), "renamed.ignored".to_string());
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({"old": 1, "other": 2})));
        assert_eq!(result.data.get("new"), Some(&json!(1)));
        // 다중 세그먼트 매핑은 첫 세그먼트만 쓴다
        assert_eq!(result.data.get("renamed"), Some(&json!(2)));
        assert!(result.data.get("old").is_none());
    }

    #[test]
    fn test_group_wraps_data() {
        let mut remote = backend();
        remote.group = "wrapped".to_string();
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({"a": 1})));
        assert_eq!(result.data.get("wrapped"), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_operations_apply_in_order() {
        let mut remote = backend();
        remote.target = "payload".to_string();
        remote.allow = vec!["id".to_string(), "name".to_string()];
        remote.mapping.insert("id".to_string(), "user_id".to_string());
        remote.group = "user".to_string();
        let formatter = new_entity_formatter(&remote);

        let result = formatter(response_with(json!({
            "payload": {"id": 7, "name": "kim", "email": "hidden"}
        })));

        assert_eq!(
            Value::Object(result.data),
            json!({"user": {"user_id": 7, "name": "kim"}})
        );
    }
}
