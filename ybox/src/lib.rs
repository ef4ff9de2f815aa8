//! Core runtime library for ybox: declaratively configured application
//! sandboxes backed by rootless podman/docker containers.
//!
//! The library is organized around the flow described in the module
//! docs of [`runtime`]: a profile INI is resolved by [`config`],
//! compiled into a [`engine::ContainerSpec`], materialized through the
//! [`engine`] adapter, coordinated with other containers by
//! [`shared_root`] and [`lock`], and recorded in the [`state`] store.
//! Package operations live in [`pkg`] and host-side wrapper generation
//! in [`wrapper`].

pub mod config;
pub mod engine;
pub mod env;
pub mod interrupt;
pub mod layout;
pub mod lock;
pub mod pkg;
pub mod resources;
pub mod runtime;
pub mod shared_root;
pub mod state;
pub mod status;
pub mod wrapper;

pub use engine::{ContainerSpec, Engine};
pub use env::Environ;
pub use layout::{ContainerLayout, DataLayout};
pub use runtime::YboxRuntime;
pub use state::{CopyType, DependencyType, RuntimeConfiguration, StateStore};
pub use ybox_shared::errors::{YboxError, YboxResult};

/// Version of the ybox library; also the current state database schema
/// version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
