pub mod config;
pub mod events;
pub mod manifest;
pub mod skill;
pub mod types;

pub use config::Config;
pub use manifest::{HandlerManifest, HandlerSpec, ServiceSpec};
pub use skill::{Skill, SkillContext, SkillError};
pub use types::*;
