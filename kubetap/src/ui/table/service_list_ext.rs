//! Renders tapped Service lists as a formatted table.

use k8s_openapi::api::core::v1::Service;

use crate::ext::{ServiceExt, int_or_string_text};

/// Extension trait rendering a list of tapped Services for `tap list`.
pub trait ServiceListExt {
    fn render_table(&self) -> String;
}

impl ServiceListExt for [Service] {
    fn render_table(&self) -> String {
        let rows = self.iter().map(service_column).collect::<Vec<_>>();
        comfy_table::Table::new()
            .load_preset(comfy_table::presets::NOTHING)
            .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
            .set_header(vec!["NAMESPACE", "NAME", "ORIGINAL TARGET PORT"])
            .add_rows(rows)
            .to_string()
    }
}

fn service_column(service: &Service) -> [String; 3] {
    [
        service.metadata.namespace.clone().unwrap_or_default(),
        service.metadata.name.clone().unwrap_or_default(),
        service
            .original_target_port()
            .map(|port| int_or_string_text(&port))
            .unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;
    use kubetap_base::consts::k8s::annotations;

    use super::ServiceListExt;

    #[test]
    fn test_render_table_lists_tapped_services() {
        let services = [Service {
            metadata: ObjectMeta {
                name: Some("sample-service".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(BTreeMap::from([(
                    annotations::ORIGINAL_TARGET_PORT.to_string(),
                    "8080".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }];

        let table = services.render_table();
        assert!(table.contains("sample-service"));
        assert!(table.contains("default"));
        assert!(table.contains("8080"));
    }
}
