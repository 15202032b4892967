pub(crate) mod ea;

pub(crate) use ea::{EaClient, EaClientConfig};
