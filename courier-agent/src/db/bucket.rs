use rst_common::standard::serde::de::DeserializeOwned;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use super::types::DbError;

/// `IndexOp` is a single change of an index bucket
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(crate = "self::serde", tag = "op", content = "id", rename_all = "lowercase")]
pub enum IndexOp {
    Add(String),
    Remove(String),
}

impl IndexOp {
    pub fn id(&self) -> &str {
        match self {
            IndexOp::Add(id) | IndexOp::Remove(id) => id,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Bucket<T>
where
    T: Serialize,
{
    collections: Vec<T>,
}

impl<T> Bucket<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            collections: Vec::new(),
        }
    }

    pub fn add(&mut self, val: T) {
        self.collections.push(val)
    }

    pub fn extend(&mut self, other: Bucket<T>) {
        self.collections.extend(other.collections)
    }

    pub fn items(&self) -> &[T] {
        &self.collections
    }
}

impl<T> Default for Bucket<T>
where
    T: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

impl Bucket<IndexOp> {
    pub fn single(op: IndexOp) -> Self {
        let mut bucket = Self::new();
        bucket.add(op);
        bucket
    }

    /// `compact` keeps only the latest operation of each id
    ///
    /// Removals are kept as well, a compacted bucket merged later over an older one must still
    /// cancel its additions.
    pub fn compact(&mut self) {
        let mut compacted: Vec<IndexOp> = Vec::new();
        for op in self.collections.drain(..) {
            compacted.retain(|existing| existing.id() != op.id());
            compacted.push(op);
        }

        self.collections = compacted;
    }

    /// `ids` lists the ids currently present
    pub fn ids(&self) -> Vec<String> {
        let mut bucket = self.clone();
        bucket.compact();

        bucket
            .collections
            .into_iter()
            .filter_map(|op| match op {
                IndexOp::Add(id) => Some(id),
                IndexOp::Remove(_) => None,
            })
            .collect()
    }
}

impl<T> TryInto<Vec<u8>> for Bucket<T>
where
    T: Serialize,
{
    type Error = DbError;

    fn try_into(self) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(&self).map_err(|err| DbError::BucketError(err.to_string()))
    }
}

impl<T> TryFrom<Vec<u8>> for Bucket<T>
where
    T: Serialize + DeserializeOwned,
{
    type Error = DbError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_json::from_slice(&value).map_err(|err| DbError::BucketError(err.to_string()))
    }
}

impl<T> ToJSON for Bucket<T>
where
    T: Serialize,
{
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_test::table_test;

    fn bucket(ops: Vec<IndexOp>) -> Bucket<IndexOp> {
        let mut bucket = Bucket::new();
        for op in ops {
            bucket.add(op);
        }

        bucket
    }

    #[test]
    fn test_ids_follow_latest_operation() {
        let add = |id: &str| IndexOp::Add(id.to_string());
        let remove = |id: &str| IndexOp::Remove(id.to_string());

        let table = vec![
            (vec![add("a"), add("b")], vec!["a", "b"]),
            (vec![add("a"), remove("a")], vec![]),
            (vec![add("a"), remove("a"), add("a")], vec!["a"]),
            (vec![remove("a"), add("b")], vec!["b"]),
            (vec![add("a"), add("a"), add("b"), remove("a")], vec!["b"]),
        ];

        for (validator, input, expected) in table_test!(table) {
            validator
                .given(&format!("{:?}", input))
                .when("list the bucket ids")
                .then("only ids whose latest operation is an addition remain")
                .assert_eq(
                    expected.iter().map(|id| id.to_string()).collect::<Vec<String>>(),
                    bucket(input.clone()).ids(),
                );
        }
    }

    #[test]
    fn test_compacted_merge_keeps_removals() {
        let mut older = bucket(vec![IndexOp::Add("a".to_string())]);

        let mut partial = bucket(vec![
            IndexOp::Add("b".to_string()),
            IndexOp::Remove("a".to_string()),
        ]);
        partial.compact();

        older.extend(partial);
        older.compact();
        assert_eq!(older.ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_bucket_from_json() {
        let original = bucket(vec![IndexOp::Add("a".to_string())]);
        let json = original.to_json().unwrap();
        assert!(json.contains(r#""op":"add""#));

        let restored: Result<Bucket<IndexOp>, DbError> = json.as_bytes().to_vec().try_into();
        assert_eq!(restored.unwrap(), original)
    }
}
