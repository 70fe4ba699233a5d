//! `sl-loader` — Frame prefetch and cache for the Scanline playout
//! engine.
//!
//! A [`MediaFrameLoader`] owns one background worker per media file.
//! Given a request (a set of media-time intervals), it maintains a set of
//! decoded, display-imported frames covering those intervals while
//! minimizing re-decodes as the request slides:
//!
//! - Frames inside both the old and new request survive untouched.
//! - Seeks happen only when the earliest missing point is behind the
//!   decoder or too far ahead to reach by sequential decode.
//! - EOF, once discovered, is terminal; coverage extends to it.
//! - Transient import failures back off and retry; terminal errors
//!   freeze the loader and surface through [`LoaderContent`].

mod loader;
mod worker;

pub use loader::{FrameLoader, LoaderContent, MediaFrameLoader};
