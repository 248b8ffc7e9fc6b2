pub mod cache;
pub mod digest;
pub mod manifest;
pub mod source;

pub use cache::{DigestCache, DigestCacheStatus};
pub use digest::{CatalogDigest, DigestItem, DigestLimits, DigestSection};
pub use manifest::{CatalogItem, Manifest, ManifestSection};
pub use source::{CatalogSource, GithubContentSource, LocalManifestSource};
