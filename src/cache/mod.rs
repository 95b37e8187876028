//! Trigger caches: the object cache, the name table, schema/user caches and
//! the triglists they hand out.

mod name_table;
mod object_cache;
mod schema_cache;
mod triglist;

pub use name_table::NameTable;
pub(crate) use object_cache::Loader;
pub use object_cache::ObjectCache;
pub use schema_cache::{CacheKey, CacheScope, SchemaCache};
pub use triglist::{Triglist, TriglistNode};
