//! lmio-dx: landmark annotation client for assets stored on Dropbox
//!
//! - [`backend`]: remote file API client with listing, media URL and image caches
//! - [`catalog`] / [`mode`]: turning a directory listing into ordered assets
//! - [`template`] / [`landmarks`]: annotation templates and landmark edit history
//! - [`navigation`]: the asset navigator and its synchronization rules

pub mod asset_source;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod geometry;
pub mod landmarks;
pub mod mode;
pub mod navigation;
pub mod template;
pub mod texture;

pub use backend::{Backend, DropboxBackend};
pub use mode::Mode;
pub use navigation::{Navigator, NavigatorOptions};
