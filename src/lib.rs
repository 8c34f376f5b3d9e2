//! Inspirational - motivational posters from subdomains
//!
//! This library provides a small HTTP service that:
//! - Builds a caption from the subdomain labels of the request's Host header
//! - Decodes internationalized (`xn--`) labels back to Unicode
//! - Picks a random font and background image from asset directories
//! - Runs an external render tool and returns its JPEG output

pub mod assets;
pub mod caption;
pub mod config;
pub mod error;
pub mod poster;
pub mod render;
pub mod server;
