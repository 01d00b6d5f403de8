//! Minimal CLI parsing for configuration overrides.

use std::env;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub port: Option<u16>,
    pub temp_dir: Option<PathBuf>,
    /// Probe the fetch tool and exit instead of serving
    pub check: bool,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--check" => options.check = true,
                "--port" => {
                    if let Some(value) = args.next() {
                        options.port = value.parse().ok();
                    }
                }
                "--temp-dir" => {
                    if let Some(value) = args.next() {
                        options.temp_dir = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--port=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.port = value.parse().ok();
                    }
                }
                _ if arg.starts_with("--temp-dir=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.temp_dir = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }

    /// Overlay command-line values on top of the environment configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = dir.clone();
        }
    }
}
