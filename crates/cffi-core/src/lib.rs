pub mod abi;
pub mod arith;
pub mod cdata;
pub mod ctype;
pub mod errors;
pub mod library;
pub mod marshal;
pub mod metatype;
pub mod operators;
pub mod parser;
pub mod runtime;
pub mod value;

// Re-export commonly used types for convenience
pub use arith::{BinOp, CmpOp, Scalar, UnOp};
pub use cdata::{CData, Rule};
pub use ctype::{CType, CTypeKind, CTypeRef, Primitive};
pub use errors::{FfiError, Result};
pub use library::Library;
pub use metatype::MetaOp;
pub use parser::{CDeclParser, DeclParser};
pub use runtime::{Ffi, FfiConfig};
pub use value::{HostFunction, Value};
