pub mod case;
pub mod settings;
pub mod sheet;
pub mod storage;
pub mod stream;
pub mod taint;

pub use case::{Case, CaseProto, Value, Width};
pub use sheet::Datasheet;
pub use stream::{CaseCount, CaseReader, CaseWriter};
pub use taint::Taint;
