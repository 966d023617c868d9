//! Customers, keyed by the legacy customer number.

use std::sync::Arc;

use db2sync_core::coerce::{country_code, is_active, phone, text, zip_code};
use db2sync_core::{
    null_as_empty, ColumnSpec, EntitySyncConfig, IdentityStrategy, RawRecord, RowSchema,
    TargetRecord, DEFAULT_CHUNK_SIZE, DEFAULT_ITERATION_LIMIT,
};
use serde::{Deserialize, Serialize};

pub const KEY_COLUMN: &str = "CUST#B";

pub const LEGACY_QUERY: &str = r#"select * from "JVFIL"."ORDP200B" order by "CUST#B""#;

pub const LIST_QUERY: &str = r#"
query CUSTOMER_LIST {
  customers(orderBy: ID_ASC) {
    nodes {
      id
      customerName
      phone
      address1
      address2
      city
      postalState
      zipCode
      countryId
      notes
      website
      active
    }
  }
}
"#;

pub const UPSERT_MUTATION: &str = r#"
mutation BULK_UPSERT_CUSTOMER($input: BulkUpsertCustomerInput!) {
  bulkUpsertCustomer(input: $input) {
    clientMutationId
  }
}
"#;

pub const DELETE_MUTATION: &str = r#"
mutation BULK_DELETE_CUSTOMER($input: BulkDeleteCustomerInput!) {
  bulkDeleteCustomer(input: $input) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub customer_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub address_1: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub address_2: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub city: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub postal_state: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub zip_code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub country_id: String,
    /// Maintained in the web application only.
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub active: bool,
}

impl TargetRecord for Customer {
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn schema() -> RowSchema {
    RowSchema::new(vec![
        // Nullable so unkeyed rows still surface as visible additions.
        ColumnSpec::text(KEY_COLUMN).nullable(),
        ColumnSpec::text("CNAMEB").nullable(),
        ColumnSpec::text("ADDR1B").nullable(),
        ColumnSpec::text("ADDR2B").nullable(),
        ColumnSpec::text("CITYB").nullable(),
        ColumnSpec::text("STATEB").nullable(),
        ColumnSpec::any("ZIPCB"),
        ColumnSpec::text("CNTRYB").nullable(),
        ColumnSpec::any("AREAB"),
        ColumnSpec::any("EXCHB"),
        ColumnSpec::any("TELB"),
        ColumnSpec::any("INACTB"),
    ])
}

pub fn normalize(existing: Option<&Customer>, raw: &RawRecord, id: &str) -> Customer {
    Customer {
        id: id.to_string(),
        customer_name: text(raw.get("CNAMEB")),
        phone: phone(raw.get("AREAB"), raw.get("EXCHB"), raw.get("TELB")),
        address_1: text(raw.get("ADDR1B")),
        address_2: text(raw.get("ADDR2B")),
        city: text(raw.get("CITYB")),
        postal_state: text(raw.get("STATEB")),
        zip_code: zip_code(raw.get("ZIPCB")),
        country_id: country_code(&text(raw.get("CNTRYB"))),
        notes: existing.and_then(|customer| customer.notes.clone()),
        website: existing.and_then(|customer| customer.website.clone()),
        active: is_active(raw.get("INACTB")),
    }
}

pub fn config() -> EntitySyncConfig<Customer> {
    EntitySyncConfig {
        item_name: "customer".to_string(),
        item_plural_name: "customers".to_string(),
        legacy_query: LEGACY_QUERY.to_string(),
        list_query: LIST_QUERY.to_string(),
        list_field: "customers".to_string(),
        upsert_mutation: UPSERT_MUTATION.to_string(),
        upsert_field: "customers".to_string(),
        delete_mutation: Some(DELETE_MUTATION.to_string()),
        iteration_limit: DEFAULT_ITERATION_LIMIT,
        chunk_size: DEFAULT_CHUNK_SIZE,
        schema: schema(),
        identity: IdentityStrategy::DeclaredKey(KEY_COLUMN),
        normalizer: Arc::new(normalize),
    }
}
