//! 레지스터 모듈
//!
//! 프로세스 전역 레지스트리를 만들기 위한 도구입니다. 시작 시점에만 쓰기가
//! 일어나고 이후에는 RW 락 아래에서 읽기만 수행됩니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 이름 → 값 레지스터
pub struct Untyped<T> {
    data: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Untyped<T> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: &str, v: T) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(name.to_string(), v);
    }

    pub fn get(&self, name: &str) -> Option<T> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(name).cloned()
    }

    pub fn clone_map(&self) -> HashMap<String, T> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.clone()
    }
}

impl<T: Clone> Default for Untyped<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 네임스페이스 단위로 분리된 레지스터 묶음
pub struct Namespaced<T> {
    data: RwLock<HashMap<String, Arc<Untyped<T>>>>,
}

impl<T: Clone> Namespaced<T> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Untyped<T>>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(namespace).cloned()
    }

    pub fn register(&self, namespace: &str, name: &str, v: T) {
        if let Some(register) = self.get(namespace) {
            register.register(name, v);
            return;
        }

        let register = Arc::new(Untyped::new());
        register.register(name, v);
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(namespace.to_string(), register);
    }

    pub fn add_namespace(&self, namespace: &str) {
        if self.get(namespace).is_some() {
            return;
        }
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Untyped::new()));
    }
}

impl<T: Clone> Default for Namespaced<T> {
    fn default() -> Self {
        Self::new()
    }
}
