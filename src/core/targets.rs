//! Target resolution: explicit devices plus pool membership.

use std::collections::BTreeSet;

use super::catalog::{Catalog, CatalogError};
use super::types::{DeviceId, PoolId};

/// Compute the device set for a binding of explicit devices and pools.
///
/// Pool membership is recomputed on every call. Unknown devices or pools are
/// reported as not found. An empty set is a valid outcome.
pub fn resolve(
    catalog: &Catalog,
    devices: &[DeviceId],
    pools: &[PoolId],
) -> Result<BTreeSet<DeviceId>, CatalogError> {
    let mut targets = BTreeSet::new();
    for device in devices {
        catalog.device(device)?;
        targets.insert(device.clone());
    }
    for pool in pools {
        targets.extend(catalog.compute_pool(pool)?);
    }
    Ok(targets)
}
