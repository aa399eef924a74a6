use rstdev_config::format::use_toml;
use rstdev_config::parser::from_file;
use rstdev_config::{types::ConfigError, Builder};

use crate::common::helpers;
use crate::common::types::CommonError;

use super::Config;

pub struct Parser {
    conf_file: String,
}

impl Parser {
    pub fn new(conf_file: String) -> Self {
        Self { conf_file }
    }

    pub fn parse(&self) -> Result<Config, ConfigError> {
        Builder::new(from_file(self.conf_file.to_owned()))
            .fetch()?
            .parse(use_toml)
    }

    /// `parse_validated` parses the file then validates every section
    pub fn parse_validated(&self) -> Result<Config, CommonError> {
        let config = self
            .parse()
            .map_err(|err| CommonError::ConfigError(err.to_string()))?;

        helpers::validate(config.clone())?;
        Ok(config)
    }
}
