//! # tessera-core
//!
//! Shared building blocks for the tessera loss kernels.
//!
//! This crate provides:
//! - [`Shape`] / [`Layout`]: logical extent plus element strides
//! - [`TensorView`] / [`TensorLayout`]: fixed-rank strided indexing
//! - [`Tensor`] / [`TensorDesc`]: owned operand buffers and their descriptors
//! - [`DType`], [`Element`], [`Accum`]: storage and accumulation types
//! - [`KernelConfig`]: per-invocation launch parameters
//! - [`Grid`], [`Workgroup`], [`LocalMemory`]: CPU emulation of work items,
//!   blocks and block-local scratch

pub mod config;
pub mod dtype;
pub mod error;
pub mod launch;
pub mod layout;
pub mod shape;
pub mod tensor;
pub mod tensor_view;

pub use config::KernelConfig;
pub use dtype::{Accum, DType, Element, WithDType};
pub use error::{Error, Result};
pub use launch::{align_up, scatter, Grid, Lanes, LaunchDims, LocalMemory, Workgroup};
pub use layout::Layout;
pub use shape::Shape;
pub use tensor::{Tensor, TensorDesc};
pub use tensor_view::{TensorLayout, TensorView, MAX_RANK};
