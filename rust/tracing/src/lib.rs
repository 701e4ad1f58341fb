pub mod init_tracer;
pub mod util;

pub use init_tracer::{init_otel_tracing, init_stdout_tracing, OtelFilter, OtelFilterLevel};
