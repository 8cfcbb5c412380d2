use clap::Args;

use crate::{cli::error::Error, config::Config, tap};

#[derive(Args, Clone)]
pub struct OffCommand {
    #[arg(help = "Name of the Service to untap")]
    pub service: String,

    #[arg(
        short,
        long,
        help = "Kubernetes namespace of the target Service. Defaults to \"default\"."
    )]
    pub namespace: Option<String>,
}

impl OffCommand {
    pub async fn run(self, kube_client: kube::Client, _config: Config) -> Result<(), Error> {
        let Self { service, namespace } = self;
        let namespace =
            namespace.filter(|namespace| !namespace.is_empty()).unwrap_or_else(default_namespace);

        tap::untap(&kube_client, &service, &namespace).await?;
        println!("Untapped Service {service:?}");
        Ok(())
    }
}

pub(crate) fn default_namespace() -> String {
    "default".to_string()
}
