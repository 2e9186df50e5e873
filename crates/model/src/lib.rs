//! `knxproject-model` holds every data type the resolution engine produces
//! and consumes, plus the loaders that turn raw archive bytes into them:
//! the reference grammar (C2), the master-data loader (C3), the
//! hardware-catalog loader (C4), the project loader (C5), and the
//! application-program loader & resolver (C6).
//!
//! Loaders are free functions over plain structs, never behind a trait
//! object — there is exactly one way to parse a `knx_master.xml` or a
//! project `0.xml`, so dynamic dispatch would buy nothing.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

pub mod appprogram;
pub mod document;
pub mod flags;
pub mod hardware;
pub mod master;
pub mod project;
pub mod refs;
pub mod rtf;
pub mod style;
pub mod types;
mod xmltree;
