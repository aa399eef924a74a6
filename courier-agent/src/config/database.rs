use rst_common::standard::serde::{self, Deserialize};

use crate::common::types::{CommonError, ToValidate};

fn enabled() -> bool {
    true
}

/// `StorageLocation` is the `[database.records.common]` table
#[derive(Deserialize, Debug, Clone)]
#[serde(crate = "self::serde")]
pub struct StorageLocation {
    pub(super) path: String,
    pub(super) cf_name: String,
}

impl StorageLocation {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cf_name(&self) -> &str {
        &self.cf_name
    }
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self {
            path: "./courier-db".to_string(),
            cf_name: "".to_string(),
        }
    }
}

/// `StorageTuning` is the optional `[database.records.db]` table
///
/// An empty `set_wal_dir` keeps the write ahead log next to the database, in `<path>-wal`.
#[derive(Deserialize, Debug, Clone)]
#[serde(crate = "self::serde")]
pub struct StorageTuning {
    #[serde(default = "enabled")]
    pub(super) create_if_missing: bool,

    #[serde(default = "enabled")]
    pub(super) create_missing_columns: bool,

    #[serde(default)]
    pub(super) set_error_if_exists: bool,

    #[serde(default)]
    pub(super) set_wal_dir: String,
}

impl StorageTuning {
    pub fn create_if_missing(&self) -> bool {
        self.create_if_missing
    }

    pub fn create_missing_columns(&self) -> bool {
        self.create_missing_columns
    }

    pub fn error_if_exists(&self) -> bool {
        self.set_error_if_exists
    }
}

impl Default for StorageTuning {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            create_missing_columns: true,
            set_error_if_exists: false,
            set_wal_dir: "".to_string(),
        }
    }
}

/// `Records` is the database holding every agent record: connections, invitations,
/// mediations and the mediator keys
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(crate = "self::serde")]
pub struct Records {
    pub(super) common: StorageLocation,

    #[serde(default)]
    pub(super) db: StorageTuning,
}

impl Records {
    pub fn location(&self) -> &StorageLocation {
        &self.common
    }

    pub fn tuning(&self) -> &StorageTuning {
        &self.db
    }

    pub fn wal_dir(&self) -> String {
        if self.db.set_wal_dir.is_empty() {
            return format!("{}-wal", self.common.path.trim_end_matches('/'));
        }

        self.db.set_wal_dir.to_owned()
    }
}

impl ToValidate for Records {
    fn validate(&self) -> Result<(), CommonError> {
        if self.common.path.is_empty() {
            return Err(CommonError::ValidationError(
                "config: database:records:path is missing".to_string(),
            ));
        }

        if self.common.cf_name.is_empty() {
            return Err(CommonError::ValidationError(
                "config: database:records:cf_name is missing".to_string(),
            ));
        }

        if self.wal_dir() == self.common.path {
            return Err(CommonError::ValidationError(
                "config: database:records:set_wal_dir must differ from path".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(crate = "self::serde")]
pub struct Database {
    pub records: Records,
}

impl ToValidate for Database {
    fn validate(&self) -> Result<(), CommonError> {
        self.records.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;

    use rstdev_config::format::use_toml;
    use rstdev_config::parser::from_file;
    use rstdev_config::{types::ConfigError, Builder};
    use table_test::table_test;

    use crate::common::helpers;

    #[test]
    fn test_parse_database_config() -> Result<(), ConfigError> {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("src/config/fixtures");

        let toml_file = format!("{}/config_db.toml", path.display());
        let config_db: Database = Builder::new(from_file(toml_file)).fetch()?.parse(use_toml)?;

        let records = &config_db.records;
        assert_eq!(records.location().cf_name(), "records-cf");
        assert_eq!(records.location().path(), "./records-storage");
        assert_eq!(records.wal_dir(), "./records-db-wal");

        assert!(records.tuning().create_if_missing());
        assert!(records.tuning().create_missing_columns());
        assert!(!records.tuning().error_if_exists());
        assert!(helpers::validate(config_db).is_ok());
        Ok(())
    }

    #[test]
    fn test_wal_dir_defaults_next_to_database() {
        let records = Records {
            common: StorageLocation {
                path: "./records/".to_string(),
                cf_name: "records".to_string(),
            },
            db: StorageTuning::default(),
        };

        assert_eq!(records.wal_dir(), "./records-wal");
        assert!(helpers::validate(records).is_ok())
    }

    #[test]
    fn test_records_validation_failed() {
        let location = StorageLocation {
            path: "./db".to_string(),
            cf_name: "records".to_string(),
        };

        let table = vec![
            (
                Records {
                    common: StorageLocation {
                        path: "".to_string(),
                        ..location.clone()
                    },
                    db: StorageTuning::default(),
                },
                "database:records:path",
            ),
            (Records::default(), "database:records:cf_name"),
            (
                Records {
                    common: location.clone(),
                    db: StorageTuning {
                        set_wal_dir: "./db".to_string(),
                        ..StorageTuning::default()
                    },
                },
                "database:records:set_wal_dir",
            ),
        ];

        for (validator, input, expected) in table_test!(table) {
            let message = helpers::validate(input.clone())
                .map_err(|err| err.to_string())
                .unwrap_err();

            validator
                .given(&format!("{:?}", input))
                .when("validate records database")
                .then("it should point to the invalid field")
                .assert_eq(true, message.contains(expected));
        }
    }
}
