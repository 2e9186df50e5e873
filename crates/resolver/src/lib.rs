//! `knxproject-resolver` is the top-level driver: it wires the archive
//! reader (C1), the master-data and hardware-catalog loaders (C3/C4), the
//! project loader (C5) and the application-program loader & resolver (C6)
//! together, and returns the final flattened output document.
//!
//! [`Configuration::new`] takes the three caller inputs — archive path,
//! optional password, optional preferred language — and
//! [`Configuration::resolve`] runs the whole pipeline once.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod configuration;

pub use configuration::Configuration;
pub use knxproject_model::document::KnxProject;
