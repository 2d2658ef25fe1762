// Copyright 2020-2026, Cerno
// Licensed under the MIT License
// See the LICENSE file or <http://opensource.org/licenses/MIT>

#![doc = include_str!("../README.md")]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]

mod apply;
mod backend;
mod config;
mod error;
mod filter;
mod format;
mod materialize;
pub mod mock;
mod plane;
mod property;
mod registry;
mod scene;
mod search;

pub use crate::apply::Outcome;
pub use crate::backend::{AtomicRequest, Cursor, DeviceBackend, FramebufferInfo, PlaneDescriptor, TestCommitResult};
pub use crate::config::AllocatorConfig;
pub use crate::error::{Error, Result};
pub use crate::format::{Format, FormatModifier, Modifier};
pub use crate::plane::{PlaneId, PlaneKind};
pub use crate::property::{PropertyId, PropertyMap, PropertyRange, PropertySchema};
pub use crate::scene::{Device, Layer, Output};
