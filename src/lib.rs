// lib.rs — 全景查看器 / 照片动画师

pub mod animation;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod input;
pub mod media;
pub mod mesh;
pub mod panorama;
pub mod projector;
pub mod renderer;
pub mod view;

pub use error::{PanoramaError, Result};
