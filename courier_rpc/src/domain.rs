use {crate::string_id, std::sync::Arc};

string_id!(
    #[doc = "Represents the name of a logical service addressable on the bus."]
    ServiceName
);

string_id!(
    #[doc = "Represents the name of a method (or event) under a service."]
    MethodName
);

string_id!(
    #[doc = "Represents the name of a broker exchange."]
    ExchangeName
);

string_id!(
    #[doc = "Represents a topic routing key."]
    RoutingKey
);

string_id!(
    #[doc = "Represents the per-envelope message ID. Never reused."]
    MessageId
);

string_id!(
    #[doc = "Represents the request ID, stable across one request/response pair."]
    RequestId
);

string_id!(
    #[doc = "Represents the correlation ID, stable across a causality chain."]
    CorrelationId
);

fn random_id() -> Arc<str> {
    uuid::Uuid::new_v4().simple().to_string().into()
}

impl MessageId {
    pub fn generate() -> Self {
        Self(random_id())
    }
}

impl RequestId {
    pub fn generate() -> Self {
        Self(random_id())
    }
}

impl CorrelationId {
    pub fn generate() -> Self {
        Self(random_id())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(MessageId::generate(), MessageId::generate());
        assert_ne!(RequestId::generate(), RequestId::generate());
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn generated_ids_are_hex_uuids() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn names_convert_from_any_string_type() {
        let from_str = ServiceName::from("hello");
        let from_string = ServiceName::from("hello".to_owned());

        assert_eq!(from_str, from_string);
        assert_eq!(from_str.as_str(), "hello");
        assert!(!from_str.is_empty());
    }
}
