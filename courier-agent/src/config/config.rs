use rst_common::standard::serde::{self, Deserialize};

use crate::common::types::{CommonError, ToValidate};

use super::{Agent, App, Database};

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(crate = "self::serde")]
pub struct Config {
    pub(super) app: App,
    pub(super) agent: Agent,
    pub(super) database: Database,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn db(&self) -> &Database {
        &self.database
    }
}

impl ToValidate for Config {
    fn validate(&self) -> Result<(), CommonError> {
        self.app.validate()?;
        self.agent.validate()?;
        self.database.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::helpers;

    #[test]
    fn test_validation_failed() {
        let validation = helpers::validate(Config::new());
        assert!(matches!(
            validation.unwrap_err(),
            CommonError::ValidationError(msg) if msg.contains("agent:label")
        ))
    }
}
