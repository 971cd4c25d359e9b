pub mod collection;
pub mod field;
pub mod object_type;

pub use collection::{CollectionMetadata, CollectionMetadataBuilder, MetadataRegistry};
pub use field::{Field, FieldType, Localization, Validator, full_name, split_full_name};
pub use object_type::{BASE_TYPE, ObjectType};
