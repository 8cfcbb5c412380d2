use snafu::Snafu;

/// Errors produced by the tap/untap state-transition engine.
///
/// Kind variants stay matchable through orchestrator wrapping so callers can
/// distinguish, for example, an already-tapped Service from a missing port.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("The provided Namespace {namespace} does not exist"))]
    NamespaceNotExist { namespace: String },

    #[snafu(display("The target Service does not have port {port}"))]
    ServiceMissingPort { port: i32 },

    #[snafu(display("The target Service has already been tapped"))]
    ServiceTapped,

    #[snafu(display("The Service selector did not match any Deployments"))]
    SelectorNoMatch,

    #[snafu(display("The Service selector matched multiple Deployments"))]
    SelectorMultiMatch,

    #[snafu(display("The Service selector matched a Deployment outside namespace {namespace}"))]
    DeploymentOutsideNamespace { namespace: String },

    #[snafu(display("No selectors are set for the target Service"))]
    SelectorsMissing,

    #[snafu(display("The ConfigMap list did not match any ConfigMaps"))]
    ConfigMapNoMatch,

    #[snafu(display("A kubetap Pod was not found for Deployment {deployment_name}"))]
    PodNotFound { deployment_name: String },

    #[snafu(display("The created resource did not match the desired state"))]
    CreateResourceMismatch,

    #[snafu(display("Failed to resolve the Service port number by name from the Deployment"))]
    DeploymentMissingPorts,

    #[snafu(display("A target identifier is required but was empty"))]
    EmptyTarget,

    #[snafu(display("Protocol {protocol} is currently not supported"))]
    UnsupportedProtocol { protocol: crate::proxy::Protocol },

    #[snafu(display("The mitmproxy sidecar only supports \"reverse\" mode, got \"{mode}\""))]
    UnsupportedProxyMode { mode: String },

    #[snafu(display(
        "Pod containers not ready after {ceiling_secs}s, cancelling port-forward; the tap itself \
         is still active"
    ))]
    ReadinessTimeout { ceiling_secs: u64 },

    #[snafu(display("Failed to list Namespaces, error: {source}"))]
    ListNamespaces {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to list Services, error: {source}"))]
    ListServices {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to get Service {name}, error: {source}"))]
    GetService {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to update Service {name}, error: {source}"))]
    UpdateService {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to list Deployments, error: {source}"))]
    ListDeployments {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to get Deployment {name}, error: {source}"))]
    GetDeployment {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to update Deployment {name}, error: {source}"))]
    UpdateDeployment {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to list Pods, error: {source}"))]
    ListPods {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to list ConfigMaps, error: {source}"))]
    ListConfigMaps {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to create ConfigMap {name}, error: {source}"))]
    CreateConfigMap {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to delete ConfigMap {name}, error: {source}"))]
    DeleteConfigMap {
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },
}

impl Error {
    /// Whether this error is an optimistic-concurrency conflict on a
    /// read-modify-write update. Only such errors are worth retrying;
    /// conflicts never occur on reads.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        let source = match self {
            Self::UpdateService { source, .. } | Self::UpdateDeployment { source, .. } => source,
            _ => return false,
        };
        matches!(source.as_ref(), kube::Error::Api(response) if response.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    fn conflict_response() -> kube::Error {
        kube::Error::Api(Box::new(kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "Operation cannot be fulfilled, object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
            metadata: None,
            details: None,
        }))
    }

    #[test]
    fn test_conflict_detected_on_updates() {
        let err = Error::UpdateService {
            name: "sample-service".to_string(),
            source: Box::new(conflict_response()),
        };
        assert!(err.is_conflict());

        let err = Error::UpdateDeployment {
            name: "sample-deployment".to_string(),
            source: Box::new(conflict_response()),
        };
        assert!(err.is_conflict());
    }

    #[test]
    fn test_non_conflict_codes_are_not_retried() {
        let err = Error::UpdateService {
            name: "sample-service".to_string(),
            source: Box::new(kube::Error::Api(Box::new(kube::core::Status {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: "not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
                metadata: None,
                details: None,
            }))),
        };
        assert!(!err.is_conflict());
        assert!(!Error::ServiceTapped.is_conflict());
    }
}
