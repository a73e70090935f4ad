/// NEO VM script handling: a decoder that turns invocation scripts into an
/// ordered data stack, a builder that composes contract-call probe scripts,
/// and a parser for asset registration scripts.
pub mod asset;
pub mod builder;
pub mod reader;

pub use builder::build_contract_call;
pub use reader::{read_script, DataStack, OpCodeData};
