//! Classifies photo-library assets into cleanup categories (screenshots,
//! web-cache artifacts, recovery junk, low-quality images) and drives that
//! classification over a whole catalog as a resumable batch session.
//!
//! Nothing here deletes assets. Records can be marked for deletion by the
//! user; acting on the marks is left to the photo platform.

pub mod catalog;
pub mod config;
pub mod core;
pub mod database;
pub mod services;
