#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint: runs one transfer request and prints its outcome.

use std::process::ExitCode;

use fileferry_app::{AppResult, run_app};

/// Runs the request named on the command line to a terminal state.
#[tokio::main]
async fn main() -> AppResult<ExitCode> {
    run_app().await
}
