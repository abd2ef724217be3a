mod tracing;

pub use self::tracing::{init_tracing, init_tracing_with_level};
