use serde::{Deserialize, Serialize};

pub mod chunk;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
}
