use rst_common::with_tokio::tokio::task::spawn_blocking;
use rstdev_storage::engine::rocksdb::db::DB;
use rstdev_storage::types::Storage;

use super::types::{DbError, Instruction, OutputOpts};

/// `Runner` executes [`Instruction`]s on the column family of the records database, every
/// call runs on the blocking thread pool
#[derive(Clone)]
pub struct Runner<TStorage>
where
    TStorage: Storage<Instance = DB>,
{
    instance: TStorage,
    cf_name: String,
}

impl<TStorage> Runner<TStorage>
where
    TStorage: Storage<Instance = DB>,
{
    pub fn new(instance: TStorage, cf_name: String) -> Self {
        Self { instance, cf_name }
    }

    pub fn cf_name(&self) -> String {
        self.cf_name.to_owned()
    }
}

impl Runner<DB> {
    pub async fn exec(&self, instruction: Instruction) -> Result<OutputOpts, DbError> {
        let instance = self.instance.clone().get_instance();

        let db_instance = instance
            .db
            .clone()
            .ok_or(DbError::DbError("db instance is missing".to_string()))?;

        let cf_def = self.cf_name();

        match instruction {
            Instruction::SaveCf { key, value } => {
                spawn_blocking(move || {
                    let cf = db_instance
                        .cf_handle(cf_def.as_str())
                        .ok_or(DbError::DbError("cf handler failed".to_string()))?;

                    db_instance
                        .put_cf(cf, key, value)
                        .map_err(|err| DbError::DbError(err.to_string()))
                })
                .await
                .map_err(|err| DbError::DbError(err.to_string()))??;

                Ok(OutputOpts::None)
            }
            Instruction::MergeCf { key, value } => {
                spawn_blocking(move || {
                    let cf = db_instance
                        .cf_handle(cf_def.as_str())
                        .ok_or(DbError::DbError("cf handler failed".to_string()))?;

                    db_instance
                        .merge_cf(cf, key, value)
                        .map_err(|err| DbError::DbError(err.to_string()))
                })
                .await
                .map_err(|err| DbError::DbError(err.to_string()))??;

                Ok(OutputOpts::None)
            }
            Instruction::GetCf { key } => {
                let value = spawn_blocking(move || {
                    let cf = db_instance
                        .cf_handle(cf_def.as_str())
                        .ok_or(DbError::DbError("cf handler failed".to_string()))?;

                    db_instance
                        .get_cf(cf, key)
                        .map_err(|err| DbError::DbError(err.to_string()))
                })
                .await
                .map_err(|err| DbError::DbError(err.to_string()))??;

                Ok(OutputOpts::SingleByte { value })
            }
            Instruction::MultiGetCf { keys } => {
                let values = spawn_blocking(move || {
                    let cf = db_instance
                        .cf_handle(cf_def.as_str())
                        .ok_or(DbError::DbError("cf handler failed".to_string()))?;

                    let cf_keys = keys.iter().map(|key| (cf, key));
                    Ok::<_, DbError>(db_instance.multi_get_cf(cf_keys))
                })
                .await
                .map_err(|err| DbError::DbError(err.to_string()))??
                .into_iter()
                .map(|value| value.map_err(|err| DbError::DbError(err.to_string())))
                .collect();

                Ok(OutputOpts::MultiBytes { values })
            }
            Instruction::RemoveCf { key } => {
                spawn_blocking(move || {
                    let cf = db_instance
                        .cf_handle(cf_def.as_str())
                        .ok_or(DbError::DbError("cf handler failed".to_string()))?;

                    db_instance
                        .delete_cf(cf, key)
                        .map_err(|err| DbError::DbError(err.to_string()))
                })
                .await
                .map_err(|err| DbError::DbError(err.to_string()))??;

                Ok(OutputOpts::None)
            }
        }
    }
}
