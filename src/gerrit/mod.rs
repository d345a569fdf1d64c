//! Gerrit collaborator: change types, reference strings, and the REST client.

mod client;
mod types;

pub use client::GerritClient;
pub use types::{format_reference, parse_reference, Change, ChangeId, MultiPartInfo};
