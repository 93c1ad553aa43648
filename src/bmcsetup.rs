//! BMC credential profile entity.
//!
//! Talking IPMI to the controllers is an external collaborator; groups
//! reference a profile and hand its fields to the install parameters.

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::Result;
use crate::store::{Collection, EntityId, EntityStore, Links};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmcSetup {
    pub id: EntityId,
    pub name: String,
    pub user: String,
    pub password: String,
    pub userid: u16,
    pub mgmtchannel: u16,
    pub netchannel: u16,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(BmcSetup, Collection::BmcSetup);

impl BmcSetup {
    pub fn create(store: &EntityStore, name: &str) -> Result<BmcSetup> {
        let mut cluster = Cluster::resolve(store)?;
        let mut bmc = store.create(BmcSetup {
            id: EntityId::generate(),
            name: name.to_string(),
            user: "ladmin".to_string(),
            password: "ladmin".to_string(),
            userid: 3,
            mgmtchannel: 1,
            netchannel: 1,
            links: Links::default(),
            usedby: Links::default(),
        })?;
        store.link(&mut bmc, &mut cluster)?;
        Ok(bmc)
    }
}
