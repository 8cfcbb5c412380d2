use clap::Args;
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;

use crate::{
    cli::error::{self, Error},
    config::Config,
    tap,
    ui::table::ServiceListExt,
};

#[derive(Args, Clone)]
pub struct ListCommand {
    #[arg(
        short,
        long,
        help = "Kubernetes namespace to list tapped Services from. Lists across all namespaces \
                when not given."
    )]
    pub namespace: Option<String>,
}

impl ListCommand {
    pub async fn run(self, kube_client: kube::Client, _config: Config) -> Result<(), Error> {
        let Self { namespace } = self;
        let namespace = namespace.filter(|namespace| !namespace.is_empty());

        let services = tap::list_tapped_services(&kube_client, namespace.as_deref()).await?;

        let mut stdout = tokio::io::stdout();
        if services.is_empty() {
            let message = namespace.map_or_else(
                || "No Services are tapped.\n".to_string(),
                |namespace| format!("No Services in the {namespace} namespace are tapped.\n"),
            );
            return stdout.write_all(message.as_bytes()).await.context(error::WriteStdoutSnafu);
        }

        stdout
            .write_all(services.render_table().as_bytes())
            .await
            .context(error::WriteStdoutSnafu)?;
        stdout.write_u8(b'\n').await.context(error::WriteStdoutSnafu)
    }
}
