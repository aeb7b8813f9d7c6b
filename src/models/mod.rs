pub mod job;
pub mod scan;
pub mod user;

pub use job::*;
pub use scan::*;
pub use user::*;

/// 实体通用trait
pub trait Entity {
    type Id;
    fn id(&self) -> Self::Id;
}
