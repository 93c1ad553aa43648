//! OS image entity.
//!
//! Packaging (tarball and torrent creation, kernel introspection) is an
//! external collaborator; this document only persists the image data the
//! boot and install parameters are assembled from.

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::store::{Collection, EntityId, EntityStore, Links};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsImage {
    pub id: EntityId,
    pub name: String,
    /// Image root on the frontend filesystem.
    pub path: String,
    pub kernver: String,
    pub kernopts: String,
    pub kernfile: String,
    pub initrdfile: String,
    /// Basename of the packed image, filled in by the packaging
    /// collaborator.
    pub tarball: String,
    pub torrent: String,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(OsImage, Collection::OsImage);

impl OsImage {
    pub fn create(store: &EntityStore, name: &str, path: &str) -> Result<OsImage> {
        if path.is_empty() {
            return Err(LunaError::Validation("image path must not be empty".into()));
        }
        let mut cluster = Cluster::resolve(store)?;
        let mut osimage = store.create(OsImage {
            id: EntityId::generate(),
            name: name.to_string(),
            path: path.to_string(),
            kernver: String::new(),
            kernopts: String::new(),
            kernfile: String::new(),
            initrdfile: String::new(),
            tarball: String::new(),
            torrent: String::new(),
            links: Links::default(),
            usedby: Links::default(),
        })?;
        store.link(&mut osimage, &mut cluster)?;
        log::info!("osimage '{}' created at '{}'", name, path);
        Ok(osimage)
    }
}
