mod error;
mod log;

use std::path::{Path, PathBuf};

use kubetap_base::consts;
use resolve_path::PathResolveExt;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

pub use self::{error::Error, log::LogConfig};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Image run in the proxy sidecar container when `--image` is not
    /// given.
    #[serde(default = "default_proxy_image")]
    pub proxy_image: String,

    /// Command arguments for the proxy sidecar container.
    #[serde(default = "default_command_args")]
    pub command_args: String,

    #[serde(default = "LogConfig::default")]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_image: default_proxy_image(),
            command_args: default_command_args(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn search_config_file_path() -> PathBuf {
        let paths = vec![Self::default_path()]
            .into_iter()
            .chain(kubetap_base::fallback_project_config_directories().into_iter().map(
                |mut path| {
                    path.push(kubetap_base::CLI_CONFIG_NAME);
                    path
                },
            ))
            .collect::<Vec<_>>();
        for path in paths {
            let Ok(exists) = path.try_exists() else {
                continue;
            };
            if exists {
                return path;
            }
        }
        Self::default_path()
    }

    #[inline]
    pub fn default_path() -> PathBuf {
        [
            kubetap_base::PROJECT_CONFIG_DIR.to_path_buf(),
            PathBuf::from(kubetap_base::CLI_CONFIG_NAME),
        ]
        .into_iter()
        .collect()
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut config: Self = {
            let path =
                path.as_ref().try_resolve().map(|path| path.to_path_buf()).with_context(|_| {
                    error::ResolveFilePathSnafu { file_path: path.as_ref().to_path_buf() }
                })?;
            if !path.exists() {
                return Ok(Self::default());
            }
            let data =
                std::fs::read(&path).context(error::OpenConfigSnafu { filename: path.clone() })?;
            serde_yaml::from_slice(&data).context(error::ParseConfigSnafu { filename: path })?
        };

        config.log.file_path = match config.log.file_path.map(|path| {
            path.try_resolve()
                .map(|path| path.to_path_buf())
                .with_context(|_| error::ResolveFilePathSnafu { file_path: path.clone() })
        }) {
            Some(Ok(path)) => Some(path),
            Some(Err(err)) => return Err(err),
            None => None,
        };

        Ok(config)
    }

    #[must_use]
    pub fn template_basic() -> Vec<u8> {
        serde_yaml::to_string(&Self::default()).unwrap_or_default().into_bytes()
    }
}

fn default_proxy_image() -> String {
    consts::DEFAULT_IMAGE_HTTP.to_string()
}

fn default_command_args() -> String {
    consts::DEFAULT_COMMAND_ARGS.to_string()
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_default_template_round_trips() {
        let template = Config::template_basic();
        let parsed: Config = serde_yaml::from_slice(&template).unwrap();
        assert_eq!(parsed.proxy_image, kubetap_base::consts::DEFAULT_IMAGE_HTTP);
        assert_eq!(parsed.command_args, kubetap_base::consts::DEFAULT_COMMAND_ARGS);
    }
}
