use rst_common::with_logging::log::warn;

use rstdev_storage::engine::rocksdb::db::DB;
use rstdev_storage::engine::rocksdb::options::Options;
use rstdev_storage::engine::rocksdb::rocksdb::rust_rocksdb::merge_operator::MergeOperands;

use crate::common::types::CommonError;
use crate::config::Records;

use super::bucket::{Bucket, IndexOp};
use super::types::DbError;
use super::Runner;

pub(super) const INDEX_PREFIX: &str = "merge_index:";

/// `merge_record_index` folds the index operations of a record type, operands and the merge
/// result share the same [`Bucket`] layout so partial merges are valid operands too
fn merge_record_index(
    key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let is_index = String::from_utf8(key.to_vec())
        .map(|key| key.starts_with(INDEX_PREFIX))
        .unwrap_or(false);

    if !is_index {
        warn!("merge requested on a non index key");
        return existing.map(|val| val.to_vec());
    }

    let mut bucket = match existing {
        Some(val) => {
            let stored: Result<Bucket<IndexOp>, DbError> = val.to_vec().try_into();
            stored.ok()?
        }
        None => Bucket::new(),
    };

    for op in operands {
        let operand: Result<Bucket<IndexOp>, DbError> = op.to_vec().try_into();
        match operand {
            Ok(operand) => bucket.extend(operand),
            Err(err) => warn!("index operand skipped: {}", err),
        }
    }

    bucket.compact();
    let output: Result<Vec<u8>, DbError> = bucket.try_into();
    output.ok()
}

pub struct Builder {
    records: Records,
}

impl Builder {
    pub fn new(records: Records) -> Self {
        Self { records }
    }

    pub fn build(&mut self) -> Result<Runner<DB>, CommonError> {
        let location = self.records.location().to_owned();
        let tuning = self.records.tuning().to_owned();
        let wal_dir = self.records.wal_dir();

        let mut db_opts = Options::new(
            location.path().to_string(),
            location.cf_name().to_string(),
        );
        db_opts
            .build_default_opts()
            .set_db_opts(move |opt| {
                opt.create_if_missing(tuning.create_if_missing());
                opt.create_missing_column_families(tuning.create_missing_columns());
                opt.set_error_if_exists(tuning.error_if_exists());
                opt.set_wal_dir(wal_dir.to_owned());

                opt
            })
            .set_cf_opts(|opt| {
                opt.set_merge_operator_associative("merge record index", merge_record_index);

                opt
            });

        let mut db = DB::new(db_opts).map_err(|err| CommonError::DBError(err.to_string()))?;
        db.build()
            .map_err(|err| CommonError::DBError(err.to_string()))?;

        Ok(Runner::new(db, location.cf_name().to_string()))
    }
}
