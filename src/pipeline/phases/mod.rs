// Build pipeline phases, in execution order

#[path = "01_context.rs"]
pub mod context;
#[path = "02_validate.rs"]
pub mod validate;
#[path = "03_render.rs"]
pub mod render;
#[path = "04_build.rs"]
pub mod build;
#[path = "05_verify.rs"]
pub mod verify;

pub use build::BuildPhase;
pub use context::ContextPhase;
pub use render::RenderPhase;
pub use validate::ValidatePhase;
pub use verify::VerifyPhase;
