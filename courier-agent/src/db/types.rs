use rst_common::with_errors::thiserror::{self, Error};

#[derive(Error, PartialEq, Debug)]
pub enum DbError {
    #[error("bucket error: {0}")]
    BucketError(String),

    #[error("instruction error: {0}")]
    InstructionError(String),

    #[error("db error: {0}")]
    DbError(String),
}

pub enum Instruction {
    SaveCf { key: String, value: Vec<u8> },
    MergeCf { key: String, value: Vec<u8> },
    GetCf { key: String },
    MultiGetCf { keys: Vec<String> },
    RemoveCf { key: String },
}

#[derive(Debug)]
pub enum OutputOpts {
    SingleByte {
        value: Option<Vec<u8>>,
    },
    MultiBytes {
        values: Vec<Result<Option<Vec<u8>>, DbError>>,
    },
    None,
}

impl OutputOpts {
    pub fn is_none(&self) -> bool {
        matches!(self, OutputOpts::None)
    }

    /// `single` extracts the value of a `GetCf`
    pub fn single(self) -> Result<Option<Vec<u8>>, DbError> {
        match self {
            OutputOpts::SingleByte { value } => Ok(value),
            _ => Err(DbError::InstructionError(
                "expected a single value output".to_string(),
            )),
        }
    }

    /// `multiple` extracts the values of a `MultiGetCf`
    pub fn multiple(self) -> Result<Vec<Result<Option<Vec<u8>>, DbError>>, DbError> {
        match self {
            OutputOpts::MultiBytes { values } => Ok(values),
            _ => Err(DbError::InstructionError(
                "expected a multiple values output".to_string(),
            )),
        }
    }
}
