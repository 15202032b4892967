#![deny(warnings, clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::items_after_statements,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::uninlined_format_args,
    clippy::option_if_let_else,
    clippy::needless_pass_by_value,
    clippy::must_use_candidate,
    clippy::struct_excessive_bools,
    clippy::too_many_lines,
    clippy::unused_async,
    clippy::map_unwrap_or,
    clippy::or_fun_call,
    clippy::redundant_closure,
    clippy::single_match_else,
    clippy::similar_names
)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub mod config;
pub mod observability;
pub(crate) mod pipeline;
pub mod scheduler;
pub(crate) mod store;
pub mod util;
