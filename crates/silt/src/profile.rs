//! Profile dispatch: which table a document lands in, and which indexed
//! columns are projected out of its body.

use serde_json::Value as Json;

use crate::config::Profile;
use crate::sql::SqlValue;
use crate::store::Doc;

/// Which table of a datastore a statement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Primary,
    Assoc,
    Dir,
    Att,
}

impl TableKind {
    /// Concrete table name for a datastore.
    pub fn table_name(&self, ds_name: &str) -> String {
        match self {
            TableKind::Primary => ds_name.to_owned(),
            TableKind::Assoc => format!("{ds_name}_assoc"),
            TableKind::Dir => format!("{ds_name}_dir"),
            TableKind::Att => format!("{ds_name}_att"),
        }
    }
}

const ASSOC_COLS: &[&str] = &["s", "st", "p", "o", "ot", "retired"];
const RESOURCE_COLS: &[&str] = &["type_", "lcstate", "availability", "name", "ts_created"];
const DIR_COLS: &[&str] = &["org", "parent", "key"];
const EVENT_COLS: &[&str] = &["origin", "origin_type", "sub_type", "ts_created", "type_"];

// An empty string counts as absent, like every other unset projection
// value.
fn doc_type(doc: &Doc) -> Option<&str> {
    doc.get("type_")
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
}

/// Select the target table and the extra indexed columns for a document
/// under a profile.
pub fn dispatch(profile: Profile, doc: &Doc) -> (TableKind, &'static [&'static str]) {
    match profile {
        Profile::Resources => match doc_type(doc) {
            Some("Association") => (TableKind::Assoc, ASSOC_COLS),
            Some(_) => (TableKind::Primary, RESOURCE_COLS),
            None => (TableKind::Primary, &[]),
        },
        Profile::Directory => match doc_type(doc) {
            Some("DirEntry") => (TableKind::Dir, DIR_COLS),
            _ => (TableKind::Primary, &[]),
        },
        Profile::Events => {
            let has_origin = doc
                .get("origin")
                .and_then(Json::as_str)
                .is_some_and(|s| !s.is_empty());
            if has_origin {
                (TableKind::Primary, EVENT_COLS)
            } else {
                (TableKind::Primary, &[])
            }
        }
        Profile::Basic => (TableKind::Primary, &[]),
    }
}

/// Project one extra-column value out of a document body.
///
/// Only values that are "present" get written: booleans always, strings
/// when non-empty, numbers rendered as text. Everything else leaves the
/// column at its default.
pub(crate) fn extra_value(doc: &Doc, col: &str) -> Option<SqlValue> {
    match doc.get(col)? {
        Json::Bool(b) => Some(SqlValue::Bool(*b)),
        Json::String(s) if !s.is_empty() => Some(SqlValue::Text(s.clone())),
        Json::Number(n) => Some(SqlValue::Text(n.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Doc {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn resources_profile_routes_associations_to_sidecar() {
        let assoc = doc(json!({"type_": "Association", "s": "a", "o": "b"}));
        let (kind, cols) = dispatch(Profile::Resources, &assoc);
        assert_eq!(kind, TableKind::Assoc);
        assert_eq!(cols, ASSOC_COLS);
        assert_eq!(kind.table_name("resources"), "resources_assoc");
    }

    #[test]
    fn resources_profile_projects_typed_records() {
        let res = doc(json!({"type_": "Resource", "name": "x"}));
        let (kind, cols) = dispatch(Profile::Resources, &res);
        assert_eq!(kind, TableKind::Primary);
        assert_eq!(cols, RESOURCE_COLS);
    }

    #[test]
    fn directory_profile_routes_direntries_only() {
        let entry = doc(json!({"type_": "DirEntry", "org": "o", "parent": "/", "key": "k"}));
        let (kind, cols) = dispatch(Profile::Directory, &entry);
        assert_eq!(kind, TableKind::Dir);
        assert_eq!(cols, DIR_COLS);

        let other = doc(json!({"type_": "Resource"}));
        let (kind, cols) = dispatch(Profile::Directory, &other);
        assert_eq!(kind, TableKind::Primary);
        assert!(cols.is_empty());
    }

    #[test]
    fn events_profile_requires_origin() {
        let ev = doc(json!({"origin": "node-1", "type_": "StateEvent"}));
        let (kind, cols) = dispatch(Profile::Events, &ev);
        assert_eq!(kind, TableKind::Primary);
        assert_eq!(cols, EVENT_COLS);

        let not_ev = doc(json!({"type_": "StateEvent"}));
        let (_, cols) = dispatch(Profile::Events, &not_ev);
        assert!(cols.is_empty());

        // an empty origin counts as absent
        let blank = doc(json!({"origin": "", "type_": "StateEvent"}));
        let (_, cols) = dispatch(Profile::Events, &blank);
        assert!(cols.is_empty());
    }

    #[test]
    fn empty_type_tag_counts_as_untyped() {
        let blank = doc(json!({"type_": "", "name": "x"}));
        let (kind, cols) = dispatch(Profile::Resources, &blank);
        assert_eq!(kind, TableKind::Primary);
        assert!(cols.is_empty());
    }

    #[test]
    fn extra_values_skip_null_and_empty_but_keep_false() {
        let d = doc(json!({"retired": false, "name": "", "type_": "R", "n": 7}));
        assert_eq!(extra_value(&d, "retired"), Some(SqlValue::Bool(false)));
        assert_eq!(extra_value(&d, "name"), None);
        assert_eq!(extra_value(&d, "type_"), Some(SqlValue::Text("R".into())));
        assert_eq!(extra_value(&d, "n"), Some(SqlValue::Text("7".into())));
        assert_eq!(extra_value(&d, "missing"), None);
    }
}
