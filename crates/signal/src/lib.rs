pub mod processor;
pub mod resolver;

pub use processor::{ExecutionReport, Outcome, ProcessError, SignalProcessor};
pub use resolver::{ResolveError, SymbolResolver};
