use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{source}"))]
    Configuration { source: crate::config::Error },

    #[snafu(display("{source}"))]
    Tap { source: crate::tap::Error },

    #[snafu(display("{source}"))]
    PortForwarder { source: crate::port_forwarder::Error },

    #[snafu(display("Failed to write to stdout, error: {source}"))]
    WriteStdout { source: std::io::Error },

    #[snafu(display("Failed to initialize Kubernetes client configuration, error: {source}"))]
    KubeConfig { source: kube::Error },

    #[snafu(display("Failed to create tokio runtime, error: {source}"))]
    InitializeTokioRuntime { source: std::io::Error },

    #[snafu(display("Failed to listen for the interrupt signal, error: {source}"))]
    InterruptSignal { source: std::io::Error },
}

impl From<crate::config::Error> for Error {
    fn from(source: crate::config::Error) -> Self {
        Self::Configuration { source }
    }
}

impl From<crate::tap::Error> for Error {
    fn from(source: crate::tap::Error) -> Self {
        Self::Tap { source }
    }
}

impl From<crate::port_forwarder::Error> for Error {
    fn from(source: crate::port_forwarder::Error) -> Self {
        Self::PortForwarder { source }
    }
}
