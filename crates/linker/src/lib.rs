//! `g10-linker` combines relocatable G10 object files into an executable
//! program image: it resolves symbols across objects, patches every
//! relocation site, groups sections into segments, selects the entry point,
//! and emits a validated image.

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod configuration;
mod link;
mod linker;

pub use configuration::*;
pub use link::{link_objects, Error as LinkError, LinkInput, LinkOptions};
pub use linker::*;
