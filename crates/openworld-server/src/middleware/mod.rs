mod request_tracing;

pub(crate) use request_tracing::request_tracing_middleware;
