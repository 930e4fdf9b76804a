//! Attachment resolution and routing.

pub mod plan;
pub mod resolver;
pub mod spec;

pub use plan::{expand_directory, RoutingPlan, ToolKind};
pub use resolver::{AttachmentResolver, RawAttachment, ResolveOptions};
pub use spec::{derive_alias, validate_alias, AttachKind, AttachmentSpec, Target};
