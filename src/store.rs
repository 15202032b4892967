pub(crate) mod dao;
pub(crate) mod models;
pub(crate) mod schema;

pub(crate) use dao::ArchiveDao;
