//! # recog-cache CLI
//!
//! Command-line interface for the recognition cache.
//!
//! ## Usage
//! ```bash
//! recog-cache store photo.jpg --name Basil
//! recog-cache lookup ~/Photos --output json
//! ```

mod cli;

use recognition_cache::Result;

fn main() -> Result<()> {
    cli::run()
}
