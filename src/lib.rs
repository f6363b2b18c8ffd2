//! Document merge service for the exam-paper platform.
//!
//! Teachers download a paper together with its marking scheme, and admins
//! bundle typeset papers, as one Word file. This crate fetches the source
//! `.docx` files by URL, rejects anything that is not a document container,
//! splices them into one document with a page break between each, and cleans
//! up every scratch file it wrote along the way.

pub mod app;
pub mod assemble;
pub mod config;
pub mod docx;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod output;
pub mod scratch;
pub mod server;
pub mod validate;
