//! Machine-interface protocol: parsing, framing and value helpers

pub mod codec;
pub mod expand;
pub mod handle;
pub mod parser;
pub mod types;
pub mod varobj;

pub use handle::FrameRef;
pub use parser::{escape, parse_line, parse_record, quote};
pub use types::{AsyncKind, AsyncRecord, OutOfBand, Record, ResultClass, StreamKind, StreamRecord, Value};
pub use varobj::VariableObject;
