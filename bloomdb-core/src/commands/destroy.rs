//! Drop every object in the target schema.

use serde::Serialize;

use crate::db::{DatabaseObject, ObjectKind, Storage};
use crate::error::{BloomError, Result};

/// Word the caller must type to confirm.
pub const CONFIRMATION: &str = "DESTROY";

/// Report returned after a destroy operation.
#[derive(Debug, Serialize)]
pub struct DestroyReport {
    /// Objects dropped, in drop order.
    pub dropped: Vec<DatabaseObject>,
}

/// Execute the destroy command.
///
/// Refuses unless `confirmation` is exactly [`CONFIRMATION`]. Views go first,
/// then tables, sequences and routines. Indexes are dropped with their tables.
pub async fn execute(storage: &dyn Storage, confirmation: &str) -> Result<DestroyReport> {
    if confirmation != CONFIRMATION {
        return Err(BloomError::DestroyNotConfirmed);
    }

    let mut objects: Vec<DatabaseObject> = storage
        .list_database_objects()
        .await?
        .into_iter()
        .filter(|o| o.kind != ObjectKind::Index)
        .collect();
    objects.sort_by(|a, b| {
        a.kind
            .drop_order()
            .cmp(&b.kind.drop_order())
            .then_with(|| a.name.cmp(&b.name))
    });

    for object in &objects {
        log::info!("Dropping object; kind={}, name={}", object.kind, object.name);
        storage.drop_object(object).await?;
    }

    log::info!("Destroy completed; objects_dropped={}", objects.len());
    Ok(DestroyReport { dropped: objects })
}
