use k8s_openapi::{
    api::core::v1::Service, apimachinery::pkg::util::intstr::IntOrString,
};
use kubetap_base::consts::k8s::annotations;

pub trait ServiceExt {
    /// A Service is tapped iff the original-target-port annotation is
    /// present.
    fn is_tapped(&self) -> bool;

    /// The recorded pre-tap target port, if any.
    fn original_target_port(&self) -> Option<IntOrString>;
}

impl ServiceExt for Service {
    fn is_tapped(&self) -> bool {
        self.original_target_port().is_some()
    }

    fn original_target_port(&self) -> Option<IntOrString> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(annotations::ORIGINAL_TARGET_PORT))
            .filter(|value| !value.is_empty())
            .map(|value| parse_int_or_string(value))
    }
}

/// Parses an annotation value back into a target port, keeping purely
/// numeric strings numeric. Restoring "8080" as a named port would corrupt
/// the Service permanently.
#[must_use]
pub fn parse_int_or_string(value: &str) -> IntOrString {
    value.parse::<i32>().map_or_else(|_| IntOrString::String(value.to_string()), IntOrString::Int)
}

/// String form of a target port, preserving whether it was numeric or named.
#[must_use]
pub fn int_or_string_text(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(port) => port.to_string(),
        IntOrString::String(name) => name.clone(),
    }
}

/// Numeric value of a target port; named ports that do not parse yield 0.
#[must_use]
pub fn int_or_string_value(port: &IntOrString) -> i32 {
    match port {
        IntOrString::Int(port) => *port,
        IntOrString::String(name) => name.parse().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::{
        api::core::v1::Service, apimachinery::pkg::apis::meta::v1::ObjectMeta,
        apimachinery::pkg::util::intstr::IntOrString,
    };
    use kubetap_base::consts::k8s::annotations;

    use super::{ServiceExt, int_or_string_text, int_or_string_value, parse_int_or_string};

    #[test]
    fn test_parse_keeps_numeric_strings_numeric() {
        assert_eq!(parse_int_or_string("8080"), IntOrString::Int(8080));
        assert_eq!(parse_int_or_string("http-web"), IntOrString::String("http-web".to_string()));
    }

    #[test]
    fn test_text_round_trip() {
        for value in ["8080", "http-web"] {
            assert_eq!(int_or_string_text(&parse_int_or_string(value)), value);
        }
    }

    #[test]
    fn test_value_of_named_port_defaults_to_zero() {
        assert_eq!(int_or_string_value(&IntOrString::Int(7777)), 7777);
        assert_eq!(int_or_string_value(&IntOrString::String("kubetap-listen".to_string())), 0);
    }

    #[test]
    fn test_is_tapped_follows_the_ledger_annotation() {
        let mut service = Service::default();
        assert!(!service.is_tapped());

        service.metadata = ObjectMeta {
            annotations: Some(BTreeMap::from([(
                annotations::ORIGINAL_TARGET_PORT.to_string(),
                "8080".to_string(),
            )])),
            ..ObjectMeta::default()
        };
        assert!(service.is_tapped());
        assert_eq!(service.original_target_port(), Some(IntOrString::Int(8080)));
    }
}
