#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod apply;
pub mod assets;
mod component;
pub mod components;
pub mod config;
pub mod controller;
mod error;
pub mod graph;
mod hash;
#[cfg(feature = "logging")]
mod logging;
mod object;
pub mod resource;
pub mod status;
pub mod store;

pub use crate::apply::{ApplyEngine, Readiness};
pub use crate::assets::{AssetProvider, StaticAssets};
pub use crate::component::{CLASS_ANNOTATION, Component, ComponentSpec};
pub use crate::config::Config;
pub use crate::controller::{
    Application, Context, Controller, ReconcileResult, Runner, Trigger,
};
pub use crate::error::*;
pub use crate::graph::{ApplyReport, Handle, ResourceGraph};
pub use crate::hash::Hash32;
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::object::{Kind, Object, ObjectKey, ObjectMeta, OwnerReference};
pub use crate::resource::{Outcome, Resource};
pub use crate::status::{
    Clock, Condition, ConditionStatus, ConditionType, Conditions, StatusTracker,
};
pub use crate::store::{MemoryStore, ObjectStore};
