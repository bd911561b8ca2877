use once_cell::sync::Lazy;

use crate::register::Untyped;

use super::{
    new_json_decoder, new_no_op_decoder, new_safe_json_decoder, new_string_decoder,
    DecoderFactory, JSON, NOOP, SAFE_JSON, STRING,
};

/// 인코딩 이름 → 디코더 팩토리 레지스터.
///
/// 등록되지 않은 이름은 JSON 디코더로 폴백합니다.
pub struct DecoderRegister {
    data: Untyped<DecoderFactory>,
}

impl DecoderRegister {
    pub fn register(&self, name: &str, factory: DecoderFactory) {
        self.data.register(name, factory);
    }

    pub fn get(&self, name: &str) -> DecoderFactory {
        for n in [name, JSON] {
            if let Some(factory) = self.data.get(n) {
                return factory;
            }
        }
        new_json_decoder
    }
}

static DECODERS: Lazy<DecoderRegister> = Lazy::new(|| {
    let register = DecoderRegister {
        data: Untyped::new(),
    };
    register.register(JSON, new_json_decoder);
    register.register(SAFE_JSON, new_safe_json_decoder);
    register.register(STRING, new_string_decoder);
    register.register(NOOP, new_no_op_decoder);
    register
});

pub fn get_register() -> &'static DecoderRegister {
    &DECODERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings_are_registered() {
        for name in [JSON, SAFE_JSON, STRING, NOOP] {
            let factory = get_register().get(name);
            assert!(factory(false)(b"{}").is_ok(), "{} decoder failed", name);
        }
    }

    #[test]
    fn test_unknown_encoding_falls_back_to_json() {
        let factory = get_register().get("some-unknown-encoding");
        let decoder = factory(false);
        let data = decoder(br#"{"a": true}"#).unwrap();
        assert!(data.get("a").unwrap().as_bool().unwrap());
    }

    #[test]
    fn test_custom_registration() {
        fn custom(_: bool) -> crate::encoding::Decoder {
            std::sync::Arc::new(|_| {
                let mut map = crate::encoding::JsonObject::new();
                map.insert("custom".to_string(), serde_json::Value::Bool(true));
                Ok(map)
            })
        }

        get_register().register("custom-test", custom);
        let decoder = get_register().get("custom-test")(false);
        let data = decoder(b"ignored").unwrap();
        assert_eq!(data.get("custom"), Some(&serde_json::Value::Bool(true)));
    }
}
