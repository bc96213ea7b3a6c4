pub mod identity;
pub mod key;
pub mod resolver;
pub mod store;

use thiserror::Error;

pub use identity::{IdentityField, MediaIdentity};
pub use key::PresetKind;
pub use resolver::{PresetLibrary, Resolution, SaveKind};
#[cfg(test)]
pub use store::MemoryStore;
pub use store::{FileStore, KvStore};

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("cannot save a {kind} preset without {field}")]
    MissingField { kind: PresetKind, field: IdentityField },
    #[error("template name is required")]
    EmptyTemplateName,
    #[error("no template named {0:?}")]
    TemplateNotFound(String),
    #[error("preset storage: {0}")]
    Storage(#[from] std::io::Error),
}
