//! External collaborator interfaces: the message store that serves raw image
//! bytes and the supplier that lists the image parts of a conversation.
//!
//! Both are traits so that tests (and any future front end) can inject
//! in-memory fakes; the engine never reaches for a hidden global.

use std::fmt;

/// Root location under which individual message parts are addressed.
///
/// A part with id `42` lives at `content://mms/part/42`.
pub const MMS_PART_ROOT: &str = "content://mms/part";

/// Content types a collection supplier treats as images. Parts with any
/// other type (text, smil, audio) are filtered out before the ids reach
/// the grid.
pub const IMAGE_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/bmp",
    "image/gif",
    "image/png",
];

/// Message-level content type identifying a multipart MMS, the container
/// whose parts are then filtered through [`IMAGE_CONTENT_TYPES`].
pub const MULTIPART_CONTENT_TYPE: &str = "application/vnd.wap.multipart.related";

/// Returns true if `content_type` is on the image allow-list.
pub fn is_image_content_type(content_type: &str) -> bool {
    IMAGE_CONTENT_TYPES.contains(&content_type)
}

/// Opaque handle to one image part in the message store.
///
/// Equality is by value; the engine never interprets the contents beyond
/// appending it to the store root to form a fetch location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats the fetch location for this id under `store_root`.
    pub fn location(&self, store_root: &str) -> String {
        format!("{}/{}", store_root, self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Serves raw, still-encoded image bytes by location string.
///
/// `None` covers both "no such part" and "the backing context has gone
/// away"; callers cannot and must not distinguish the two. Implementations
/// must be callable from any worker thread.
pub trait ImageStore: Send + Sync {
    fn fetch(&self, location: &str) -> Option<Vec<u8>>;
}

/// Lists the image part ids of a conversation, in message order.
///
/// Filtering non-image parts is the supplier's job, driven by
/// [`IMAGE_CONTENT_TYPES`]; the grid engine displays whatever ids it is
/// handed.
pub trait CollectionSupplier {
    fn image_ids(&self, conversation_id: &str) -> Vec<ImageId>;
}
