/*!
Decoding of EBML streams, driven by schemas written in the EDTD language.

`schema_parser::compile` turns EDTD source into an [`Edtd`], and
[`ElementReader`] walks an EBML byte stream element by element, looking up
each element's type in the compiled schema to decode its payload.
*/

pub mod parser;
pub mod schema_lexer;
pub mod schema_parser;
pub mod schema_types;
pub mod stream;

pub use parser::{ElementHeader, ElementReader, ReaderConfig, ReaderError, Value};
pub use schema_parser::{compile, SchemaError};
pub use schema_types::{Cardinality, ElementDef, ElementId, ElementType, Edtd, RangeParam};
