//! Built-in entity catalogue: canonical record shape, legacy row schema,
//! normalizer and remote documents for each synchronized entity type.

pub mod customer;
pub mod inventory_item;
pub mod vessel;

pub use customer::Customer;
pub use inventory_item::InventoryItem;
pub use vessel::Vessel;

/// Entity names in the order a scheduled run processes them.
pub const BUILTIN_ENTITIES: &[&str] = &["vessel", "customer", "inventory_item"];
