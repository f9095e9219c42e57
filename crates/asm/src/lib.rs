//! `g10-asm` is the assembler back end of the G10 toolchain.
//!
//! It consumes a stream of parsed [`Statement`]s — the contract with the
//! upstream lexer/parser — and produces one relocatable
//! [`Object`][g10_object::g10::Object] per translation unit, in two passes:
//! a layout pass that resolves label addresses and section sizes, and an
//! emission pass that encodes instructions, emits data, and records a
//! relocation for every reference it cannot resolve locally.

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod assembler;
mod encoder;
mod error;
mod expression;
mod section;
mod statement;
mod symbols;

pub use assembler::*;
pub use encoder::{decode, DecodedInstruction, Mnemonic, Shape};
pub use error::Error;
pub use expression::*;
pub use statement::*;
pub use symbols::SymbolTable;
