//! Guild → member navigation over the ledger document, with
//! default-insertion semantics and defensive shape checks.

use std::fmt;

use contracts::MemberRecord;
use serde_json::{Map, Value};

pub const MEMBERS_KEY: &str = "members";

/// A traversed node exists but is not the expected container type. This only
/// happens when the backing file was edited by hand; callers recover by
/// treating the subtree as absent rather than crashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError {
    pub node: String,
}

impl ShapeError {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ledger node {} is not an object", self.node)
    }
}

impl std::error::Error for ShapeError {}

/// Fetch a guild's subtree, optionally inserting an empty one.
pub fn guild_entry<'a>(
    doc: &'a mut Value,
    guild_id: &str,
    create_if_missing: bool,
) -> Result<Option<&'a mut Map<String, Value>>, ShapeError> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| ShapeError::new("ledger root"))?;
    object_entry(root, guild_id, create_if_missing, || {
        format!("guild '{guild_id}'")
    })
}

/// Fetch the member map of a guild subtree, optionally inserting an empty one.
pub fn members_entry(
    guild: &mut Map<String, Value>,
    create_if_missing: bool,
) -> Result<Option<&mut Map<String, Value>>, ShapeError> {
    object_entry(guild, MEMBERS_KEY, create_if_missing, || {
        format!("'{MEMBERS_KEY}' map")
    })
}

/// Fetch a single member's subtree, optionally inserting an empty one. The
/// empty subtree reads back as an all-default [`MemberRecord`].
pub fn member_entry<'a>(
    members: &'a mut Map<String, Value>,
    member_id: &str,
    create_if_missing: bool,
) -> Result<Option<&'a mut Map<String, Value>>, ShapeError> {
    object_entry(members, member_id, create_if_missing, || {
        format!("member '{member_id}'")
    })
}

/// Combined guild → members traversal for callers that always need the
/// member map.
pub fn members_scope<'a>(
    doc: &'a mut Value,
    guild_id: &str,
    create_if_missing: bool,
) -> Result<Option<&'a mut Map<String, Value>>, ShapeError> {
    let Some(guild) = guild_entry(doc, guild_id, create_if_missing)? else {
        return Ok(None);
    };
    members_entry(guild, create_if_missing)
}

/// Install the canonical default record for a new member. Returns true only
/// on first registration; an existing member keeps accrued balances.
pub fn ensure_member_registered(members: &mut Map<String, Value>, member_id: &str) -> bool {
    let already_registered = members
        .get(member_id)
        .is_some_and(|node| !node.is_null());
    if already_registered {
        return false;
    }

    let mut node = Map::new();
    write_record_fields(&mut node, &MemberRecord::default());
    members.insert(member_id.to_string(), Value::Object(node));
    true
}

/// Lenient typed view of a member's subtree. Malformed counters decode to
/// zero; a missing or null entry is `None`.
pub fn read_member(
    members: &Map<String, Value>,
    member_id: &str,
) -> Result<Option<MemberRecord>, ShapeError> {
    match members.get(member_id) {
        None | Some(Value::Null) => Ok(None),
        Some(node @ Value::Object(_)) => {
            let record = serde_json::from_value(node.clone()).unwrap_or_default();
            Ok(Some(record))
        }
        Some(_) => Err(ShapeError::new(format!("member '{member_id}'"))),
    }
}

/// Write a typed record back into the member map, preserving nothing else:
/// the record is the full canonical shape of a member subtree.
pub fn write_member(members: &mut Map<String, Value>, member_id: &str, record: &MemberRecord) {
    let mut node = Map::new();
    write_record_fields(&mut node, record);
    members.insert(member_id.to_string(), Value::Object(node));
}

/// Drop a guild's entire subtree (guild-leave semantics). Member records are
/// only ever deleted this way.
pub fn remove_guild(doc: &mut Value, guild_id: &str) -> bool {
    doc.as_object_mut()
        .map(|root| root.remove(guild_id).is_some())
        .unwrap_or(false)
}

fn write_record_fields(node: &mut Map<String, Value>, record: &MemberRecord) {
    node.insert("coins".to_string(), record.coins.into());
    node.insert("shares".to_string(), record.shares.into());
    node.insert("cringe_meter".to_string(), record.cringe_meter.into());
    node.insert(
        "prev_daily".to_string(),
        record
            .prev_daily
            .as_ref()
            .map(|date| Value::String(date.clone()))
            .unwrap_or(Value::Null),
    );
    node.insert("on_expedition".to_string(), record.on_expedition.into());
}

fn object_entry<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
    create_if_missing: bool,
    describe: impl Fn() -> String,
) -> Result<Option<&'a mut Map<String, Value>>, ShapeError> {
    if create_if_missing && !parent.contains_key(key) {
        parent.insert(key.to_string(), Value::Object(Map::new()));
    }

    match parent.get_mut(key) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ShapeError::new(describe())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_doc() -> Value {
        Value::Object(Map::new())
    }

    #[test]
    fn registration_is_idempotent() {
        let mut doc = empty_doc();
        let members = members_scope(&mut doc, "g1", true)
            .expect("shape ok")
            .expect("created");

        assert!(ensure_member_registered(members, "m1"));

        // Accrue a balance, then register again: nothing resets.
        let mut record = read_member(members, "m1").expect("shape ok").expect("present");
        record.coins = 450;
        write_member(members, "m1", &record);

        assert!(!ensure_member_registered(members, "m1"));
        let record = read_member(members, "m1").expect("shape ok").expect("present");
        assert_eq!(record.coins, 450);
    }

    #[test]
    fn missing_guild_without_create_is_none() {
        let mut doc = empty_doc();
        assert!(members_scope(&mut doc, "g1", false)
            .expect("shape ok")
            .is_none());
        // The failed lookup must not have inserted anything.
        assert_eq!(doc, empty_doc());
    }

    #[test]
    fn wrong_container_type_is_a_shape_error() {
        let mut doc = serde_json::json!({ "g1": "scribbled over by hand" });
        let err = guild_entry(&mut doc, "g1", false).expect_err("should fail");
        assert!(err.node.contains("g1"));

        let mut doc = serde_json::json!({ "g1": { "members": 7 } });
        let guild = guild_entry(&mut doc, "g1", false)
            .expect("guild ok")
            .expect("present");
        assert!(members_entry(guild, false).is_err());
    }

    #[test]
    fn null_member_counts_as_unregistered() {
        let mut doc = serde_json::json!({ "g1": { "members": { "m1": null } } });
        let members = members_scope(&mut doc, "g1", false)
            .expect("shape ok")
            .expect("present");

        assert_eq!(read_member(members, "m1").expect("shape ok"), None);
        assert!(ensure_member_registered(members, "m1"));
    }

    #[test]
    fn lenient_read_defaults_malformed_counters() {
        let mut doc = serde_json::json!({
            "g1": { "members": { "m1": { "coins": "oops", "shares": 3 } } }
        });
        let members = members_scope(&mut doc, "g1", false)
            .expect("shape ok")
            .expect("present");

        let record = read_member(members, "m1").expect("shape ok").expect("present");
        assert_eq!(record.coins, 0);
        assert_eq!(record.shares, 3);
        assert!(!record.is_on_expedition());
    }

    #[test]
    fn remove_guild_drops_members_implicitly() {
        let mut doc = empty_doc();
        let members = members_scope(&mut doc, "g1", true)
            .expect("shape ok")
            .expect("created");
        ensure_member_registered(members, "m1");

        assert!(remove_guild(&mut doc, "g1"));
        assert!(!remove_guild(&mut doc, "g1"));
        assert!(members_scope(&mut doc, "g1", false)
            .expect("shape ok")
            .is_none());
    }
}
