//! Vessels: no shared primary key with the legacy file, so identity is
//! resolved by (vessel code, arrival port) against the vessels already known
//! remotely.

use std::sync::Arc;

use chrono::NaiveDate;
use db2sync_core::coerce::{flag_present, legacy_date, text};
use db2sync_core::{
    null_as_empty, ColumnSpec, DerivedLookup, EntitySyncConfig, IdentityStrategy, NaturalKey,
    RawRecord, RowSchema, TargetRecord,
};
use serde::{Deserialize, Serialize};

pub const LEGACY_QUERY: &str =
    r#"select * from "JVFIL"."ORDP750Z" union select * from "JVPREFIL"."ORDP750Z" order by "BOAT#Z""#;

pub const LIST_QUERY: &str = r#"
query VESSEL_LIST {
  vessels(orderBy: ID_ASC) {
    nodes {
      id
      vesselCode
      preVesselCode
      vesselName
      arrivalPort
      countryId
      departureDate
      arrivalDate
      dischargeDate
      coast
      isPre
      invFlag
    }
  }
}
"#;

pub const UPSERT_MUTATION: &str = r#"
mutation BULK_UPSERT_VESSEL($input: BulkUpsertVesselInput!) {
  bulkUpsertVessel(input: $input) {
    clientMutationId
  }
}
"#;

pub const DELETE_MUTATION: &str = r#"
mutation BULK_DELETE_VESSEL($input: BulkDeleteVesselInput!) {
  bulkDeleteVessel(input: $input) {
    clientMutationId
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vessel {
    pub id: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub vessel_code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pre_vessel_code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vessel_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub arrival_port: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub country_id: String,
    pub departure_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub coast: String,
    pub is_pre: bool,
    pub inv_flag: bool,
}

impl TargetRecord for Vessel {
    fn id(&self) -> &str {
        &self.id
    }
}

pub fn schema() -> RowSchema {
    RowSchema::new(vec![
        ColumnSpec::text("BOAT#Z"),
        ColumnSpec::text("BNAMEZ").nullable(),
        ColumnSpec::text("ARVPTZ"),
        ColumnSpec::text("CNTRYZ").nullable(),
        ColumnSpec::decimal("DEPDDZ").nullable(),
        ColumnSpec::decimal("DEPMMZ").nullable(),
        ColumnSpec::decimal("DEPYYZ").nullable(),
        ColumnSpec::decimal("ARVDDZ").nullable(),
        ColumnSpec::decimal("ARVMMZ").nullable(),
        ColumnSpec::decimal("ARVYYZ").nullable(),
        ColumnSpec::decimal("DISDDZ").nullable(),
        ColumnSpec::decimal("DISMMZ").nullable(),
        ColumnSpec::decimal("DISYYZ").nullable(),
        ColumnSpec::any("PAYTYZ"),
        ColumnSpec::any("INVFGZ"),
    ])
}

pub fn source_key(raw: &RawRecord) -> NaturalKey {
    NaturalKey::new([text(raw.get("BOAT#Z")), text(raw.get("ARVPTZ"))])
}

pub fn target_key(vessel: &Vessel) -> NaturalKey {
    NaturalKey::new([vessel.vessel_code.as_str(), vessel.arrival_port.as_str()])
}

/// Rows without a country come from the pre-vessel file; those carry their
/// own code as the pre-vessel code. Other rows keep whatever pre-vessel code
/// the remote record already links them to.
pub fn normalize(existing: Option<&Vessel>, raw: &RawRecord, id: &str) -> Vessel {
    let vessel_code = text(raw.get("BOAT#Z"));
    let country_id = text(raw.get("CNTRYZ"));
    let is_pre = country_id.is_empty();
    let pre_vessel_code = if is_pre {
        vessel_code.clone()
    } else {
        existing
            .map(|vessel| vessel.pre_vessel_code.clone())
            .unwrap_or_default()
    };

    Vessel {
        id: id.to_string(),
        vessel_code,
        pre_vessel_code,
        vessel_name: text(raw.get("BNAMEZ")),
        arrival_port: text(raw.get("ARVPTZ")),
        country_id,
        departure_date: legacy_date(raw.get("DEPDDZ"), raw.get("DEPMMZ"), raw.get("DEPYYZ")),
        arrival_date: legacy_date(raw.get("ARVDDZ"), raw.get("ARVMMZ"), raw.get("ARVYYZ")),
        discharge_date: legacy_date(raw.get("DISDDZ"), raw.get("DISMMZ"), raw.get("DISYYZ")),
        coast: if flag_present(raw.get("PAYTYZ")) { "WC" } else { "EC" }.to_string(),
        is_pre,
        inv_flag: flag_present(raw.get("INVFGZ")),
    }
}

pub fn config() -> EntitySyncConfig<Vessel> {
    EntitySyncConfig {
        item_name: "vessel".to_string(),
        item_plural_name: "vessels".to_string(),
        legacy_query: LEGACY_QUERY.to_string(),
        list_query: LIST_QUERY.to_string(),
        list_field: "vessels".to_string(),
        upsert_mutation: UPSERT_MUTATION.to_string(),
        upsert_field: "vessels".to_string(),
        delete_mutation: Some(DELETE_MUTATION.to_string()),
        iteration_limit: 2000,
        chunk_size: 200,
        schema: schema(),
        identity: IdentityStrategy::DerivedLookup(DerivedLookup {
            source_key,
            target_key,
        }),
        normalizer: Arc::new(normalize),
    }
}
