//! A Vulkan renderer drawing a physically-based object under image-based
//! lighting captured from an HDR panorama, composited to the screen through
//! an offscreen HDR pass.
//!
//! The [`frame::Application`] orchestrator owns one instance of everything
//! and drives the per-frame loop; the [`backend`] module holds the Vulkan
//! object wrappers it is built from.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod camera;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod offscreen;
pub mod push_constants;
pub mod scene;
pub mod swapchain;
pub mod texture;
