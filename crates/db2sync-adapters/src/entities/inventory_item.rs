//! Inventory items. The legacy inventory extract has no usable key, so rows
//! are identified by position; the query's `order by` keeps that stable.

use std::sync::Arc;

use db2sync_core::coerce::{flag_present, parse_measurement, parse_number, text};
use db2sync_core::{
    null_as_empty, ColumnSpec, EntitySyncConfig, IdentityStrategy, RawRecord, RowSchema,
    TargetRecord, DEFAULT_CHUNK_SIZE, DEFAULT_ITERATION_LIMIT,
};
use serde::{Deserialize, Serialize};

pub const LEGACY_QUERY: &str =
    r#"select * from "JVFIL"."ORDP710I" order by "VESSLI", "PRODI", "LOCI""#;

pub const LIST_QUERY: &str = r#"
query INVENTORY_ITEM_LIST {
  inventoryItems(orderBy: ID_ASC) {
    nodes {
      id
      vesselCode
      productId
      locationId
      palletsReceived
      palletsOnHand
      netWeight
      shrinkPct
      plu
    }
  }
}
"#;

pub const UPSERT_MUTATION: &str = r#"
mutation BULK_UPSERT_INVENTORY_ITEM($input: BulkUpsertInventoryItemInput!) {
  bulkUpsertInventoryItem(input: $input) {
    clientMutationId
  }
}
"#;

pub const DELETE_MUTATION: &str = r#"
mutation BULK_DELETE_INVENTORY_ITEM($input: BulkDeleteInventoryItemInput!) {
  bulkDeleteInventoryItem(input: $input) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vessel_code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub product_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub location_id: String,
    pub pallets_received: Option<f64>,
    pub pallets_on_hand: Option<f64>,
    /// -1 when the legacy value is present but unreadable.
    pub net_weight: f64,
    pub shrink_pct: f64,
    pub plu: bool,
}

impl TargetRecord for InventoryItem {
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn schema() -> RowSchema {
    RowSchema::new(vec![
        ColumnSpec::text("VESSLI"),
        ColumnSpec::text("PRODI"),
        ColumnSpec::text("LOCI").nullable(),
        ColumnSpec::decimal("RCVDI").nullable(),
        ColumnSpec::decimal("ONHDI").nullable(),
        ColumnSpec::any("NWGTI"),
        ColumnSpec::any("SHRKI"),
        ColumnSpec::any("PLUFI"),
    ])
}

pub fn normalize(_existing: Option<&InventoryItem>, raw: &RawRecord, id: &str) -> InventoryItem {
    InventoryItem {
        id: id.to_string(),
        vessel_code: text(raw.get("VESSLI")),
        product_id: text(raw.get("PRODI")),
        location_id: text(raw.get("LOCI")),
        pallets_received: parse_number(raw.get("RCVDI")),
        pallets_on_hand: parse_number(raw.get("ONHDI")),
        net_weight: parse_measurement(raw.get("NWGTI")),
        shrink_pct: parse_measurement(raw.get("SHRKI")),
        plu: flag_present(raw.get("PLUFI")),
    }
}

pub fn config() -> EntitySyncConfig<InventoryItem> {
    EntitySyncConfig {
        item_name: "inventory_item".to_string(),
        item_plural_name: "inventory items".to_string(),
        legacy_query: LEGACY_QUERY.to_string(),
        list_query: LIST_QUERY.to_string(),
        list_field: "inventoryItems".to_string(),
        upsert_mutation: UPSERT_MUTATION.to_string(),
        upsert_field: "inventoryItems".to_string(),
        delete_mutation: Some(DELETE_MUTATION.to_string()),
        iteration_limit: DEFAULT_ITERATION_LIMIT,
        chunk_size: DEFAULT_CHUNK_SIZE,
        schema: schema(),
        identity: IdentityStrategy::Positional,
        normalizer: Arc::new(normalize),
    }
}
