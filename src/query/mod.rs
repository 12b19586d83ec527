pub mod service;

pub use crate::cursor::{Page, PageToken};
pub use service::{PageRequest, QueryService};
