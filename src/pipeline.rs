pub(crate) mod fetch;
pub(crate) mod payload;
pub(crate) mod persist;

pub(crate) use fetch::FetchPipeline;
