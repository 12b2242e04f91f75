//! Locators are always recomputed from the stable identity and never stored,
//! so moving the engine to a new address leaves existing records valid.

use crate::registry::StableIdentity;

pub fn compute(base_address: &str, identity: &StableIdentity) -> String {
    format!(
        "{}/view?filename={}&subfolder={}&type={}",
        base_address.trim_end_matches('/'),
        urlencoding::encode(&identity.name),
        urlencoding::encode(&identity.subfolder),
        urlencoding::encode(&identity.kind),
    )
}
