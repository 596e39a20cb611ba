use serde_jsonlines::{JsonLinesReader, JsonLinesWriter};
use tracing::info;

use crate::model::Link;
use crate::store::{LinkStore, StoreError};

/// Writes every stored link as one JSON document per line, sorted by short
/// name. The same format is accepted by restore.
pub async fn export(store: &dyn LinkStore) -> Result<Vec<u8>, StoreError> {
    let mut links = store.load_all().await?;
    links.sort_by(|a, b| a.short.cmp(&b.short));

    let mut writer = JsonLinesWriter::new(Vec::new());
    for link in &links {
        writer.write(link).map_err(StoreError::backend)?;
    }
    Ok(writer.into_inner())
}

/// Inserts links from snapshot data, one JSON document per line. Links whose
/// normalized identity already exists are left untouched, so a restore never
/// overwrites live data. Returns how many links were inserted.
pub async fn restore(store: &dyn LinkStore, data: &[u8]) -> Result<usize, StoreError> {
    let mut reader = JsonLinesReader::new(data);
    let mut restored = 0;
    while let Some(link) = reader.read::<Link>().map_err(StoreError::backend)? {
        if link.short.is_empty() {
            continue;
        }
        match store.load(&link.short).await {
            Ok(_) => continue, // exists
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        store.save(&link).await?;
        restored += 1;
    }
    if restored > 0 {
        info!("restored {restored} links from snapshot");
    }
    Ok(restored)
}
