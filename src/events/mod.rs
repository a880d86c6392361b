//! # Events Module
//!
//! Cache activity reported over channels, so a CLI progress bar, a log
//! shipper or a test can observe lookups and maintenance without hooks.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//! let cache = CacheManager::builder().events(sender).build()?;
//!
//! cache.get_cached_result(&image)?;
//! for event in receiver.drain() {
//!     if let Event::Lookup(outcome) = event {
//!         println!("lookup: {}", outcome);
//!     }
//! }
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
